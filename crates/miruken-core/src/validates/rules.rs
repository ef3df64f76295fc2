//! Field rules used by `#[derive(Validate)]`.

use std::fmt::Display;

pub const REQUIRED: &str = "is required";
pub const INVALID_EMAIL: &str = "is not a valid email address";

/// Values that can be missing.
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Presence for &str {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl<T> Presence for Option<T> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

macro_rules! impl_presence_for_numbers {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Presence for $ty {
                fn is_present(&self) -> bool {
                    *self != (0 as $ty)
                }
            }
        )*
    };
}

impl_presence_for_numbers!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// Values with a length.
pub trait Length {
    fn length(&self) -> usize;
}

impl Length for String {
    fn length(&self) -> usize {
        self.chars().count()
    }
}

impl<T> Length for Vec<T> {
    fn length(&self) -> usize {
        self.len()
    }
}

/// Something that looks like `local@domain.tld`.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// Message for a value outside `min..=max`, if it is.
pub fn range<T: PartialOrd + Display>(value: &T, min: Option<T>, max: Option<T>) -> Option<String> {
    if let Some(min) = min
        && *value < min
    {
        return Some(format!("must be at least {min}"));
    }
    if let Some(max) = max
        && *value > max
    {
        return Some(format!("must be at most {max}"));
    }
    None
}

/// Message for a length outside `min..=max`, if it is.
pub fn length<T: Length + ?Sized>(value: &T, min: Option<usize>, max: Option<usize>) -> Option<String> {
    let len = value.length();
    if let Some(min) = min
        && len < min
    {
        return Some(format!("length must be at least {min}"));
    }
    if let Some(max) = max
        && len > max
    {
        return Some(format!("length must be at most {max}"));
    }
    None
}
