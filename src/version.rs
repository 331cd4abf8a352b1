use chrono::{DateTime, Local};
use once_cell::sync::Lazy;

fn build_datetime() -> DateTime<Local> {
    let build_timestamp: i64 = env!("BUILD_TIME").parse().unwrap_or(0);
    DateTime::from_timestamp(build_timestamp, 0)
        .map(|utc| utc.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

static VERSION_INFO: Lazy<String> = Lazy::new(|| {
    format!(
        "callbridge {}\n\
         Build Time: {}\n\
         Git Commit: {}\n\
         Git Branch: {}\n\
         Git Status: {}",
        env!("CARGO_PKG_VERSION"),
        build_datetime().format("%Y-%m-%d %H:%M:%S %Z"),
        env!("GIT_COMMIT_HASH"),
        env!("GIT_BRANCH"),
        env!("GIT_DIRTY")
    )
});

static SHORT_VERSION: Lazy<String> = Lazy::new(|| {
    let version = env!("CARGO_PKG_VERSION");
    let git_commit = env!("GIT_COMMIT_HASH");
    if env!("GIT_DIRTY") == "dirty" {
        format!("{}-{}-dirty", version, git_commit)
    } else {
        format!("{}-{}", version, git_commit)
    }
});

pub fn get_version_info() -> &'static str {
    VERSION_INFO.as_str()
}

pub fn get_short_version() -> &'static str {
    SHORT_VERSION.as_str()
}

/// Sent as `User-Agent` on outbound CRM and media requests.
pub fn get_useragent() -> String {
    format!(
        "callbridge/{} (built {})",
        env!("CARGO_PKG_VERSION"),
        build_datetime().format("%Y-%m-%d")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_strings() {
        let short = get_short_version();
        assert!(short.starts_with(env!("CARGO_PKG_VERSION")));
        assert!(std::ptr::eq(short, get_short_version()));
        assert!(std::ptr::eq(get_version_info(), get_version_info()));
        assert!(get_version_info().starts_with("callbridge "));
        assert!(get_useragent().starts_with(&format!("callbridge/{}", env!("CARGO_PKG_VERSION"))));
    }
}
