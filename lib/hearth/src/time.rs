/// Returns the current wall-clock time as an opaque human-readable string.
/// Uniqueness over human-scale intervals is the only property callers rely
/// on.
#[inline]
pub fn wallclock_string() -> String {
    chrono::Local::now().to_string()
}
