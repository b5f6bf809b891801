use crate::jvm::class_file::Version;
use crate::transform::MergePolicy;

/// Engine configuration for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// What to do with instructions no execution path reaches
    pub unreachable_code: UnreachableCode,

    /// Whether passes with overlapping write intents may be composed
    pub merge_policy: MergePolicy,

    /// Highest class file major version accepted by the loader
    ///
    /// The lowest is always 45 (JDK 1.0.2).
    pub max_major_version: u16,

    /// Number of worker threads used when processing many classes (`None` lets `rayon` decide)
    pub threads: Option<usize>,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            unreachable_code: UnreachableCode::Preserve,
            merge_policy: MergePolicy::Reject,
            max_major_version: Version::DEFAULT_MAX_MAJOR,
            threads: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

/// Handling of unreachable instructions during frame recomputation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnreachableCode {
    /// Leave the instructions alone, emitting a best-effort frame where the verifier needs one
    Preserve,

    /// Replace the instructions with `nop`s ending in an `athrow`, under a `Throwable` frame
    Neutralize,

    /// Remove the instructions (and exception ranges left empty by the removal)
    Strip,
}

impl std::str::FromStr for UnreachableCode {
    type Err = String;

    fn from_str(value: &str) -> Result<UnreachableCode, String> {
        match value {
            "preserve" => Ok(UnreachableCode::Preserve),
            "neutralize" => Ok(UnreachableCode::Neutralize),
            "strip" => Ok(UnreachableCode::Strip),
            other => Err(format!(
                "unknown unreachable code policy '{}' (expected preserve, neutralize, or strip)",
                other
            )),
        }
    }
}
