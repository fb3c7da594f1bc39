/// Compile-time assertion.
///
/// ```
/// rebufr_foundation::const_assert!(u16::MAX as u32 == (1 << 16) - 1);
/// ```
#[macro_export]
macro_rules! const_assert {
    ($($tt:tt)*) => {
        const _: () = assert!($($tt)*);
    };
}
