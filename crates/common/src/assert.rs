/// An assertion used in places where the assert would introduce minimal overhead,
/// For instance, link checks, size checks, alignment checks etc.
///
/// t stands for tree
#[cfg(feature = "no_assert")]
#[macro_export]
macro_rules! tassert {
    ($a:expr$(,$($t:tt)*)?) => {};
}

/// An assertion used in places where the assert would introduce minimal overhead,
/// For instance, link checks, size checks, alignment checks etc.
///
/// t stands for tree
#[cfg(not(feature = "no_assert"))]
#[macro_export]
macro_rules! tassert {
    ($a:expr$(,$($t:tt)*)?) => {
        assert!($a $(,$($t)*)?)
    };
}

/// Equality version of [`tassert`].
#[cfg(feature = "no_assert")]
#[macro_export]
macro_rules! tassert_eq {
    ($a:expr,$b:expr$(,$($t:tt)*)?) => {};
}

/// Equality version of [`tassert`].
#[cfg(not(feature = "no_assert"))]
#[macro_export]
macro_rules! tassert_eq {
    ($a:expr,$b:expr$(,$($t:tt)*)?) => {
        assert_eq!($a,$b$(, $($t)*)?)
    };
}

/// Assertion for slow checks, which might require more work or are in critical paths.
/// For instance walking a whole sibling list.
#[cfg(feature = "slow_assert")]
#[macro_export]
macro_rules! sassert {
    ($a:expr$(,$($t:tt)*)?) => {
        assert!($a $(,$($t)*)?)
    };
}

/// Assertion for slow checks, which might require more work or are in critical paths.
/// For instance walking a whole sibling list.
#[cfg(not(feature = "slow_assert"))]
#[macro_export]
macro_rules! sassert {
    ($a:expr$(,$($t:tt)*)?) => {};
}

/// Equality version of [`sassert`].
#[cfg(feature = "slow_assert")]
#[macro_export]
macro_rules! sassert_eq {
    ($a:expr,$b:expr$(,$($t:tt)*)?) => {
        assert_eq!($a,$b$(, $($t)*)?)
    };
}

/// Equality version of [`sassert`].
#[cfg(not(feature = "slow_assert"))]
#[macro_export]
macro_rules! sassert_eq {
    ($a:expr,$b:expr$(,$($t:tt)*)?) => {};
}
