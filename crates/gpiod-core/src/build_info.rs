//! Build metadata embedded by `build.rs`, reported by `gpiod version` and
//! logged when a front end starts.

/// Short git commit hash, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("GPIOD_GIT_HASH");

/// Cargo profile the binary was built with.
pub const BUILD_PROFILE: &str = env!("GPIOD_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"0.1.0 (abc1234, release)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_string_carries_all_parts() {
        let v = version_string();
        assert!(v.starts_with(VERSION));
        assert!(v.contains(GIT_HASH));
        assert!(v.ends_with(&format!("{BUILD_PROFILE})")));
    }

    #[test]
    fn test_metadata_present() {
        assert!(!GIT_HASH.is_empty());
        assert!(!BUILD_PROFILE.is_empty());
    }
}
