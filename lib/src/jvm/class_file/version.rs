use crate::jvm::binary_format::{Deserialize, Serialize};
use crate::jvm::Error;
use byteorder::{ReadBytesExt, WriteBytesExt};
use std::fmt;

/// Class file version
///
/// Field order matches the on-disk order (minor first).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    pub minor_version: u16,
    pub major_version: u16,
}

impl Version {
    /// JVM class file version corresponding to Java SE 6
    pub const JAVA6: Version = Version {
        minor_version: 0,
        major_version: 50,
    };

    /// JVM class file version corresponding to Java SE 8 (released March 2014)
    pub const JAVA8: Version = Version {
        minor_version: 0,
        major_version: 52,
    };

    /// JVM class file version corresponding to Java SE 11
    pub const JAVA11: Version = Version {
        minor_version: 0,
        major_version: 55,
    };

    /// Oldest readable major version (JDK 1.1)
    pub const MIN_MAJOR: u16 = 45;

    /// Newest major version read by default (Java SE 22)
    pub const DEFAULT_MAX_MAJOR: u16 = 66;

    /// Do methods in this class need a `StackMapTable` to pass verification?
    pub fn needs_frames(&self) -> bool {
        self.major_version >= 50
    }

    /// Are `jsr` and `ret` still allowed?
    pub fn allows_subroutines(&self) -> bool {
        self.major_version < 51
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major_version, self.minor_version)
    }
}

impl Serialize for Version {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.minor_version.serialize(writer)?;
        self.major_version.serialize(writer)?;
        Ok(())
    }
}

impl Deserialize for Version {
    fn deserialize<R: ReadBytesExt>(reader: &mut R) -> Result<Self, Error> {
        let minor_version = u16::deserialize(reader)?;
        let major_version = u16::deserialize(reader)?;
        Ok(Version {
            minor_version,
            major_version,
        })
    }
}
