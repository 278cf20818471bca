/// Free-running microsecond counter supplied by the HAL timer.
pub trait Clock {
    /// Microseconds since an arbitrary epoch; wraps.
    fn micros(&self) -> u32;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn micros(&self) -> u32 {
        (**self).micros()
    }
}
