//! Tracing subscriber setup.

/// Install a compact `tracing` subscriber filtered by `RUST_LOG`, falling back
/// to `default_directive` (e.g. `"info"` or `"wallet_sync=debug"`).
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging(default_directive: &str) {
	let mut filter = tracing_subscriber::EnvFilter::from_default_env();
	match default_directive.parse() {
		Ok(directive) => filter = filter.add_directive(directive),
		Err(_) => filter = filter.add_directive(tracing::Level::INFO.into()),
	}

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.try_init();
}
