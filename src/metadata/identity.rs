//! Assembly identities and display-name handling.
//!
//! The dependency mapper keys its cache by both the simple name and the full display name
//! of an assembly (`Name, Version=1.2.3.4, Culture=neutral, PublicKeyToken=null`). This
//! module parses and produces those display names.

use std::fmt::{self, Write};
use std::str::FromStr;

use crate::Result;

/// Identity of an assembly, as found on an image or on one of its assembly references.
///
/// Equality and hashing cover every component, so two references to different versions of
/// the same library are distinct identities. Use [`AssemblyIdentity::name`] for name-only
/// comparisons.
///
/// # Examples
///
/// ```rust
/// use dotpatch::metadata::identity::{AssemblyIdentity, AssemblyVersion};
///
/// let identity = AssemblyIdentity::new("Game", AssemblyVersion::new(1, 0, 0, 0));
/// assert_eq!(
///     identity.display_name(),
///     "Game, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssemblyIdentity {
    /// Simple assembly name (e.g., "mscorlib", "Game.Mod.mm").
    pub name: String,
    /// Four-part version number.
    pub version: AssemblyVersion,
    /// Culture for satellite assemblies; `None` means culture-neutral.
    pub culture: Option<String>,
    /// Eight byte public key token of strong-named assemblies.
    pub public_key_token: Option<[u8; 8]>,
}

/// Four-part version numbering for .NET assemblies.
///
/// Versions are compared component-wise in order: major, minor, build, revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AssemblyVersion {
    /// Major version component.
    pub major: u16,
    /// Minor version component.
    pub minor: u16,
    /// Build version component.
    pub build: u16,
    /// Revision version component.
    pub revision: u16,
}

impl AssemblyIdentity {
    /// Creates a culture-neutral identity without a public key token
    #[must_use]
    pub fn new(name: impl Into<String>, version: AssemblyVersion) -> Self {
        Self {
            name: name.into(),
            version,
            culture: None,
            public_key_token: None,
        }
    }

    /// Parse an assembly display name.
    ///
    /// # Format
    ///
    /// ```text
    /// AssemblyName[, Version=Major.Minor.Build.Revision][, Culture=culture][, PublicKeyToken=token]
    /// ```
    ///
    /// Unknown components are ignored.
    ///
    /// # Errors
    /// Returns an error if the name is empty, the version is malformed or the public key
    /// token is not 16 hex characters.
    pub fn parse(display_name: &str) -> Result<Self> {
        let mut parts = display_name.split(',').map(str::trim);
        let name = parts.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(structural_error!("Assembly name cannot be empty"));
        }

        let mut identity = Self::new(name, AssemblyVersion::default());
        for part in parts {
            if let Some(value) = part.strip_prefix("Version=") {
                identity.version = AssemblyVersion::parse(value)?;
            } else if let Some(value) = part.strip_prefix("Culture=") {
                if value != "neutral" {
                    identity.culture = Some(value.to_string());
                }
            } else if let Some(value) = part.strip_prefix("PublicKeyToken=") {
                if value != "null" && !value.is_empty() {
                    identity.public_key_token = Some(parse_token(value)?);
                }
            }
        }

        Ok(identity)
    }

    /// Generate the display name string for this identity.
    #[must_use]
    pub fn display_name(&self) -> String {
        let mut result = String::with_capacity(self.name.len() + 80);
        result.push_str(&self.name);

        let _ = write!(result, ", Version={}", self.version);
        let _ = write!(
            result,
            ", Culture={}",
            self.culture.as_deref().unwrap_or("neutral")
        );

        result.push_str(", PublicKeyToken=");
        match &self.public_key_token {
            Some(bytes) => {
                for byte in bytes {
                    let _ = write!(result, "{byte:02x}");
                }
            }
            None => result.push_str("null"),
        }

        result
    }

    /// Cache key qualified by a runtime version, used to disambiguate multi-targeted caches
    #[must_use]
    pub fn runtime_qualified_name(&self, runtime_version: &str) -> String {
        format!("{} [RT:{}]", self.display_name(), runtime_version)
    }
}

fn parse_token(value: &str) -> Result<[u8; 8]> {
    if value.len() != 16 || !value.is_ascii() {
        return Err(structural_error!(
            "PublicKeyToken must be exactly 16 hex characters, got '{}'",
            value
        ));
    }

    let mut token = [0u8; 8];
    for (i, byte) in token.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&value[i * 2..i * 2 + 2], 16)
            .map_err(|e| structural_error!("Invalid hex in PublicKeyToken '{}': {}", value, e))?;
    }
    Ok(token)
}

impl AssemblyVersion {
    /// Creates a version from its four components
    #[must_use]
    pub const fn new(major: u16, minor: u16, build: u16, revision: u16) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse a dotted version string with one to four components.
    ///
    /// # Errors
    /// Returns an error if the version string has an invalid format.
    pub fn parse(version_str: &str) -> Result<Self> {
        let parts: Vec<&str> = version_str.split('.').collect();
        if parts.is_empty() || parts.len() > 4 {
            return Err(structural_error!("Invalid version format: {}", version_str));
        }

        let mut components = [0u16; 4];
        for (i, part) in parts.iter().enumerate() {
            components[i] = part
                .parse::<u16>()
                .map_err(|_| structural_error!("Invalid version component: {}", part))?;
        }

        Ok(Self::new(
            components[0],
            components[1],
            components[2],
            components[3],
        ))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl fmt::Display for AssemblyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for AssemblyVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromStr for AssemblyIdentity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
