const KILOBYTE: f64 = 1024.0;
const MEGABYTE: f64 = KILOBYTE * KILOBYTE;
const GIGABYTE: f64 = KILOBYTE * MEGABYTE;

pub fn pretty_bytes_size(len: u64) -> String {
    let float_len = len as f64;
    let (unit, value) = if float_len > GIGABYTE {
        ("GiB", float_len / GIGABYTE)
    } else if float_len > MEGABYTE {
        ("MiB", float_len / MEGABYTE)
    } else if float_len > KILOBYTE {
        ("KiB", float_len / KILOBYTE)
    } else {
        ("bytes", float_len)
    };
    format!("{value:.2}{unit}")
}

/// Synchronous in-band progress notifications, `(fraction in [0,1], message)`.
///
/// The engine never prints; a caller that wants a progress bar supplies the
/// callback at open time.
pub struct ProgressSink {
    callback: Option<Box<dyn FnMut(f64, &str)>>,
}

impl ProgressSink {
    pub fn new(callback: Option<Box<dyn FnMut(f64, &str)>>) -> Self {
        ProgressSink { callback }
    }

    pub fn disabled() -> Self {
        ProgressSink { callback: None }
    }

    pub fn report(&mut self, fraction: f64, message: &str) {
        if let Some(callback) = self.callback.as_mut() {
            callback(fraction.clamp(0.0, 1.0), message);
        }
    }
}
