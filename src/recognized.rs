use std::fmt;

/// A numeric code from the archive that is either one of the variants we know
/// how to handle (`Known`) or an unrecognized raw value (`Unknown`).
///
/// Unknown codes are not errors: they are carried through so the caller can
/// report them and fall back to passthrough/skip behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Recognized<T, Raw = u32> {
    Known(T),
    Unknown(Raw),
}

impl<T: Copy, Raw: Copy> Copy for Recognized<T, Raw> {}

/// A closed enumeration that maps to and from a raw on-disk code.
pub trait KnownCode: Sized + Copy {
    type Raw: Copy + PartialEq + fmt::Debug;

    fn from_code(raw: Self::Raw) -> Option<Self>;

    fn code(self) -> Self::Raw;
}

impl<T: KnownCode> Recognized<T, T::Raw> {
    /// Classify a raw code.
    pub fn from_code(raw: T::Raw) -> Self {
        match T::from_code(raw) {
            Some(known) => Recognized::Known(known),
            None => Recognized::Unknown(raw),
        }
    }

    /// The raw code, whether or not it was recognized.
    pub fn code(&self) -> T::Raw {
        match self {
            Recognized::Known(t) => t.code(),
            Recognized::Unknown(raw) => *raw,
        }
    }
}

impl<T, Raw> Recognized<T, Raw> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Recognized::Known(t) => Some(t),
            Recognized::Unknown(_) => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Recognized::Known(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Recognized::Unknown(_))
    }
}

impl<T, Raw> From<T> for Recognized<T, Raw> {
    fn from(value: T) -> Self {
        Recognized::Known(value)
    }
}

impl<T: fmt::Display, Raw: fmt::Display> fmt::Display for Recognized<T, Raw> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognized::Known(t) => t.fmt(f),
            Recognized::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Colour {
        Red,
    }

    impl KnownCode for Colour {
        type Raw = u8;

        fn from_code(raw: u8) -> Option<Self> {
            (raw == 1).then_some(Colour::Red)
        }

        fn code(self) -> u8 {
            1
        }
    }

    impl fmt::Display for Colour {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("red")
        }
    }

    #[test]
    fn unknown_code_is_preserved() {
        let c = Recognized::<Colour, u8>::from_code(7);
        assert!(c.is_unknown());
        assert_eq!(c.code(), 7);
        assert_eq!(c.to_string(), "unknown(7)");
    }

    #[test]
    fn known_code_round_trips() {
        let c = Recognized::<Colour, u8>::from_code(1);
        assert_eq!(c.known(), Some(&Colour::Red));
        assert_eq!(c.code(), 1);
        assert_eq!(c.to_string(), "red");
    }
}
