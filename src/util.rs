
use chrono::{DateTime, Local};
use std::sync::OnceLock;

//  Create a `null` date value to use when a log
//  entry has no date.
pub fn null_date() -> &'static DateTime<Local> {
    static NULL_DATE: OnceLock<DateTime<Local>> = OnceLock::new();
    NULL_DATE.get_or_init(|| {
        DateTime::from_timestamp_millis(0)
            .map(|d| d.with_timezone(&Local))
            .unwrap_or_else(Local::now)
    })
}

//  SVN emits RFC 3339 dates; anything else falls back to the null date.
pub fn parse_svn_date_opt(opt_date_str: Option<String>) -> DateTime<Local> {
    opt_date_str
        .and_then(|s| DateTime::parse_from_rfc3339(s.as_str()).ok())
        .map(|d| d.with_timezone(&Local))
        .unwrap_or_else(|| *null_date())
}

pub fn display_svn_datetime(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d %H:%M:%S").to_string()
}

//  Join a repository-relative prefix ("/trunk", "") and a diff-relative
//  path ("src/a.txt") into the absolute form the log reports.
pub fn join_repo_path<S, T>(prefix: S, leaf: T) -> String
    where S: AsRef<str>, T: AsRef<str>
{
    let mut path = String::new();
    path += prefix.as_ref().trim_end_matches('/');
    path += "/";
    path += leaf.as_ref().trim_start_matches('/');
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn svn_dates_parse_to_local_time() {
        let parsed = parse_svn_date_opt(Some("2024-03-01T12:30:00.000000Z".to_string()));
        assert_ne!(&parsed, null_date());
    }

    #[test]
    fn bad_or_missing_dates_fall_back_to_null() {
        assert_eq!(&parse_svn_date_opt(None), null_date());
        assert_eq!(&parse_svn_date_opt(Some("not a date".into())), null_date());
    }

    #[test]
    fn repo_paths_join_without_doubled_slashes() {
        assert_eq!(join_repo_path("/trunk", "src/a.txt"), "/trunk/src/a.txt");
        assert_eq!(join_repo_path("", "src/a.txt"), "/src/a.txt");
        assert_eq!(join_repo_path("/", "/src/a.txt"), "/src/a.txt");
    }
}
