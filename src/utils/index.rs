use std::time::Duration;

/// Render an ETA the way progress log lines show it: whole minutes once a
/// minute or more remains, otherwise whole seconds.
pub fn format_time_remaining(remaining: Duration) -> String {
    let seconds = remaining.as_secs_f64();
    if seconds >= 60.0 {
        return format!("{:.0} mins", (seconds / 60.0).ceil());
    }
    if seconds.ceil() == 1.0 {
        return "1 sec".to_string();
    }
    format!("{:.0} secs", seconds.ceil())
}

pub fn format_percentage(percentage: f64) -> String {
    format!("{:.2}%", percentage)
}
