/// Declares an enum whose variants map one-to-one onto protocol strings.
///
/// Generates the enum, its parse error type, `as_str()`, `Display`, `AsRef<str>`,
/// and a case-insensitive `FromStr`. The error message names what failed to parse.
///
/// ```ignore
/// wire_enum! {
///     /// Doc comment for the enum.
///     pub enum Leg: ParseLegError("leg") {
///         A => "aleg",
///         B => "bleg",
///     }
/// }
/// ```
macro_rules! wire_enum {
    (
        $(#[$enum_meta:meta])*
        $vis:vis enum $Name:ident : $Err:ident($what:literal) {
            $(
                $(#[$var_meta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[non_exhaustive]
        #[allow(missing_docs)]
        $vis enum $Name {
            $(
                $(#[$var_meta])*
                $variant,
            )+
        }

        #[doc = concat!("Error returned when a string is not a known ", $what, ".")]
        #[derive(Debug, Clone, PartialEq, Eq)]
        $vis struct $Err(pub String);

        impl std::fmt::Display for $Err {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!("unknown ", $what, ": {}"), self.0)
            }
        }

        impl std::error::Error for $Err {}

        impl $Name {
            /// Protocol string for this value.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $Name::$variant => $wire, )+
                }
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl AsRef<str> for $Name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = $Err;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Ok($Name::$variant);
                    }
                )+
                Err($Err(s.to_string()))
            }
        }
    };
}
