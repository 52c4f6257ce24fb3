use std::time::Duration;

/// Formats an elapsed time as `h:mm:ss.ss`.
pub fn hms_string(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    let h = (secs / 3600.) as u64;
    let m = ((secs % 3600.) / 60.) as u64;
    let s = secs % 60.;
    format!("{h}:{m:02}:{s:05.2}")
}
