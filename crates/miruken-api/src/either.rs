//! A value that is one of two alternatives.
//!
//! Scheduled responses use `Either<Error, Payload>`: the left side holds a
//! failure, the right side a success.

/// Either a `Left` or a `Right` value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

impl<L, R> Either<L, R> {
    pub fn left(value: L) -> Self {
        Either::Left(value)
    }

    pub fn right(value: R) -> Self {
        Either::Right(value)
    }

    pub fn is_left(&self) -> bool {
        matches!(self, Either::Left(_))
    }

    pub fn is_right(&self) -> bool {
        matches!(self, Either::Right(_))
    }

    pub fn as_ref(&self) -> Either<&L, &R> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => Either::Right(right),
        }
    }

    pub fn into_left(self) -> Option<L> {
        match self {
            Either::Left(left) => Some(left),
            Either::Right(_) => None,
        }
    }

    pub fn into_right(self) -> Option<R> {
        match self {
            Either::Left(_) => None,
            Either::Right(right) => Some(right),
        }
    }

    /// Maps the right value.
    pub fn map<T>(self, f: impl FnOnce(R) -> T) -> Either<L, T> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => Either::Right(f(right)),
        }
    }

    pub fn map_left<T>(self, f: impl FnOnce(L) -> T) -> Either<T, R> {
        match self {
            Either::Left(left) => Either::Left(f(left)),
            Either::Right(right) => Either::Right(right),
        }
    }

    /// Chains a computation on the right value.
    pub fn flat_map<T>(self, f: impl FnOnce(R) -> Either<L, T>) -> Either<L, T> {
        match self {
            Either::Left(left) => Either::Left(left),
            Either::Right(right) => f(right),
        }
    }

    /// Collapses both sides into one value.
    pub fn fold<T>(self, left: impl FnOnce(L) -> T, right: impl FnOnce(R) -> T) -> T {
        match self {
            Either::Left(value) => left(value),
            Either::Right(value) => right(value),
        }
    }

    /// Runs the callback for whichever side is present.
    pub fn match_with(&self, left: impl FnOnce(&L), right: impl FnOnce(&R)) {
        match self {
            Either::Left(value) => left(value),
            Either::Right(value) => right(value),
        }
    }
}

impl<L, R> From<Result<R, L>> for Either<L, R> {
    fn from(result: Result<R, L>) -> Self {
        match result {
            Ok(value) => Either::Right(value),
            Err(err) => Either::Left(err),
        }
    }
}

impl<L, R> From<Either<L, R>> for Result<R, L> {
    fn from(either: Either<L, R>) -> Self {
        match either {
            Either::Left(err) => Err(err),
            Either::Right(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_touches_only_the_right_side() {
        let right: Either<String, i32> = Either::right(2);
        let left: Either<String, i32> = Either::left("bad".into());
        assert_eq!(right.map(|v| v * 10), Either::Right(20));
        assert_eq!(left.clone().map(|v| v * 10), Either::Left("bad".into()));
        assert_eq!(left.map_left(|e| e.len()), Either::<usize, i32>::Left(3));
    }

    #[test]
    fn test_flat_map_short_circuits_on_left() {
        let half = |v: i32| {
            if v % 2 == 0 {
                Either::Right(v / 2)
            } else {
                Either::Left(format!("{v} is odd"))
            }
        };
        assert_eq!(Either::<String, i32>::right(8).flat_map(half), Either::Right(4));
        assert_eq!(
            Either::<String, i32>::right(3).flat_map(half),
            Either::Left("3 is odd".into())
        );
    }

    #[test]
    fn test_fold_and_match() {
        let value: Either<&str, i32> = Either::right(7);
        assert_eq!(value.fold(|e| e.len() as i32, |v| v + 1), 8);

        let mut seen = None;
        Either::<&str, i32>::left("nope").match_with(|e| seen = Some(e.to_string()), |_| {});
        assert_eq!(seen.as_deref(), Some("nope"));
    }

    #[test]
    fn test_converts_to_and_from_result() {
        let either: Either<String, u8> = Ok::<u8, String>(1).into();
        assert!(either.is_right());
        let result: Result<u8, String> = Either::<String, u8>::left("x".into()).into();
        assert_eq!(result, Err("x".into()));
    }
}
