//! Common types for dealing with symbol data.

use std::borrow::Cow;
use std::fmt;
use std::str;

/// An error returned when parsing an unknown [`Arch`] string.
#[derive(Debug)]
pub struct UnknownArchError;

impl fmt::Display for UnknownArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture")
    }
}

impl std::error::Error for UnknownArchError {}

/// A CPU architecture as used in symbol files and thread contexts.
///
/// The string representation of this enum matches the architecture field of
/// the `MODULE` record in symbol files, which is also what minidump readers
/// report for thread contexts.
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Arch {
    Unknown = 0,
    X86 = 1,
    Amd64 = 2,
    Arm64 = 3,
    Ppc64 = 4,
}

impl Arch {
    /// Creates an `Arch` from its `u32` representation.
    ///
    /// Returns `Arch::Unknown` for all unknown values.
    pub fn from_u32(val: u32) -> Arch {
        match val {
            1 => Arch::X86,
            2 => Arch::Amd64,
            3 => Arch::Arm64,
            4 => Arch::Ppc64,
            _ => Arch::Unknown,
        }
    }

    /// Returns the name of the architecture as used in symbol files.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x86_64",
            Arch::Arm64 => "arm64",
            Arch::Ppc64 => "ppc64",
        }
    }

    /// The size in bytes of a general purpose register on this architecture.
    pub fn word_size(self) -> usize {
        match self {
            Arch::X86 => 4,
            _ => 8,
        }
    }
}

impl Default for Arch {
    fn default() -> Arch {
        Arch::Unknown
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl str::FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(string: &str) -> Result<Arch, UnknownArchError> {
        Ok(match string {
            "unknown" => Arch::Unknown,
            "x86" => Arch::X86,
            // Breakpad exclusively uses "x86_64", but the ELF and MachO
            // ecosystems also spell it "amd64".
            "x86_64" | "amd64" => Arch::Amd64,
            "arm64" | "aarch64" => Arch::Arm64,
            "ppc64" => Arch::Ppc64,
            _ => return Err(UnknownArchError),
        })
    }
}

/// An error returned when parsing an unknown [`Language`] string.
#[derive(Debug)]
pub struct UnknownLanguageError;

impl fmt::Display for UnknownLanguageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown language")
    }
}

impl std::error::Error for UnknownLanguageError {}

/// A programming language declared in debugging information.
///
/// The language drives how qualified names are composed from scope chains and
/// which demangling scheme applies. It is represented as `u32` so it can be
/// stored directly in the binary symbol cache.
#[repr(u32)]
#[non_exhaustive]
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Language {
    Unknown = 0,
    C = 1,
    Cpp = 2,
    Cobol = 3,
    Java = 4,
    Assembler = 5,
    ObjC = 6,
    ObjCpp = 7,
    Rust = 8,
    Swift = 9,
}

impl Language {
    /// Creates a `Language` from its `u32` representation.
    ///
    /// Returns `Language::Unknown` for all unknown values.
    pub fn from_u32(val: u32) -> Language {
        match val {
            1 => Self::C,
            2 => Self::Cpp,
            3 => Self::Cobol,
            4 => Self::Java,
            5 => Self::Assembler,
            6 => Self::ObjC,
            7 => Self::ObjCpp,
            8 => Self::Rust,
            9 => Self::Swift,
            _ => Self::Unknown,
        }
    }

    /// Returns the name of the language.
    ///
    /// The name is always given in lower case without special characters or
    /// spaces, suitable for serialization and parsing. For a human readable
    /// name, use the `Display` implementation instead.
    pub fn name(self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Cobol => "cobol",
            Language::Java => "java",
            Language::Assembler => "asm",
            Language::ObjC => "objc",
            Language::ObjCpp => "objcpp",
            Language::Rust => "rust",
            Language::Swift => "swift",
        }
    }
}

impl Default for Language {
    fn default() -> Language {
        Language::Unknown
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let formatted = match *self {
            Language::Unknown => "unknown",
            Language::C => "C",
            Language::Cpp => "C++",
            Language::Cobol => "Cobol",
            Language::Java => "Java",
            Language::Assembler => "assembler",
            Language::ObjC => "Objective-C",
            Language::ObjCpp => "Objective-C++",
            Language::Rust => "Rust",
            Language::Swift => "Swift",
        };

        write!(f, "{}", formatted)
    }
}

impl str::FromStr for Language {
    type Err = UnknownLanguageError;

    fn from_str(string: &str) -> Result<Language, UnknownLanguageError> {
        Ok(match string {
            "unknown" => Language::Unknown,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "cobol" => Language::Cobol,
            "java" => Language::Java,
            "asm" => Language::Assembler,
            "objc" => Language::ObjC,
            "objcpp" => Language::ObjCpp,
            "rust" => Language::Rust,
            "swift" => Language::Swift,
            _ => return Err(UnknownLanguageError),
        })
    }
}

/// Whether a [`Name`] is mangled or not.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NameMangling {
    /// The name is definitely mangled.
    Mangled,
    /// The name is not mangled.
    Unmangled,
    /// The mangling of the name is not known.
    Unknown,
}

impl Default for NameMangling {
    fn default() -> Self {
        NameMangling::Unknown
    }
}

/// The name of a potentially mangled symbol.
///
/// Debugging information often only contains mangled names in its symbol and
/// debug data. The mangling scheme depends on the compiler and programming
/// language. `Name` wraps a potentially mangled string together with an
/// optionally declared language and mangling state. To demangle the name, use
/// the `Demangle` extension trait in `talus-demangle`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Name<'a> {
    string: Cow<'a, str>,
    lang: Language,
    mangling: NameMangling,
}

impl<'a> Name<'a> {
    /// Constructs a new name with given mangling and language.
    #[inline]
    pub fn new<S>(string: S, mangling: NameMangling, lang: Language) -> Self
    where
        S: Into<Cow<'a, str>>,
    {
        Name {
            string: string.into(),
            lang,
            mangling,
        }
    }

    /// Returns the raw, potentially mangled string of the name.
    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// The language of the symbol, or `Language::Unknown` if undeclared.
    pub fn language(&self) -> Language {
        self.lang
    }

    /// Returns whether the name is mangled, if known.
    pub fn mangling(&self) -> NameMangling {
        self.mangling
    }

    /// Converts this name into a `String`, dropping language and mangling.
    pub fn into_string(self) -> String {
        self.string.into_owned()
    }
}

impl AsRef<str> for Name<'_> {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<Name<'_>> for String {
    fn from(name: Name<'_>) -> Self {
        name.string.into()
    }
}

impl<'a, S> From<S> for Name<'a>
where
    S: Into<Cow<'a, str>>,
{
    fn from(string: S) -> Self {
        Self::new(string, NameMangling::Unknown, Language::Unknown)
    }
}

impl fmt::Display for Name<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())?;

        if f.alternate() && self.lang != Language::Unknown {
            write!(f, " [{}]", self.lang)?;
        }

        Ok(())
    }
}

macro_rules! impl_eq {
    ($lhs:ty, $rhs: ty) => {
        impl<'a, 'b> PartialEq<$rhs> for $lhs {
            #[inline]
            fn eq(&self, other: &$rhs) -> bool {
                PartialEq::eq(&self.string, other)
            }
        }

        impl<'a, 'b> PartialEq<$lhs> for $rhs {
            #[inline]
            fn eq(&self, other: &$lhs) -> bool {
                PartialEq::eq(self, &other.string)
            }
        }
    };
}

impl_eq! { Name<'a>, str }
impl_eq! { Name<'a>, &'b str }
impl_eq! { Name<'a>, String }
impl_eq! { Name<'a>, std::borrow::Cow<'b, str> }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_roundtrip() {
        for arch in [Arch::X86, Arch::Amd64, Arch::Arm64, Arch::Ppc64] {
            assert_eq!(arch.name().parse::<Arch>().unwrap(), arch);
            assert_eq!(Arch::from_u32(arch as u32), arch);
        }
    }

    #[test]
    fn test_arch_aliases() {
        assert_eq!("amd64".parse::<Arch>().unwrap(), Arch::Amd64);
        assert_eq!("aarch64".parse::<Arch>().unwrap(), Arch::Arm64);
    }

    #[test]
    fn test_language_from_u32() {
        assert_eq!(Language::from_u32(2), Language::Cpp);
        assert_eq!(Language::from_u32(4711), Language::Unknown);
    }

    #[test]
    fn test_name_display() {
        let name = Name::new("_ZN3foo3barEv", NameMangling::Mangled, Language::Cpp);
        assert_eq!(name.to_string(), "_ZN3foo3barEv");
        assert_eq!(format!("{:#}", name), "_ZN3foo3barEv [C++]");
    }
}
