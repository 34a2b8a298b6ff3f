use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The slice of `GET /repos/{owner}/{name}` the collector keeps.
///
/// Deserializes from the upstream snake_case payload and serializes as camelCase into artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    #[serde(alias = "full_name")]
    pub full_name: String,
    #[serde(alias = "default_branch")]
    pub default_branch: String,
    #[serde(alias = "html_url", default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(alias = "stargazers_count", default)]
    pub stargazers_count: u64,
    #[serde(alias = "forks_count", default)]
    pub forks_count: u64,
    #[serde(alias = "pushed_at", default)]
    pub pushed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_upstream_payload() {
        let json = r#"{
            "full_name": "acme/api",
            "default_branch": "trunk",
            "html_url": "https://github.com/acme/api",
            "archived": false,
            "stargazers_count": 12,
            "forks_count": 3,
            "pushed_at": "2024-01-03T10:00:00Z",
            "open_issues_count": 9
        }"#;

        let metadata: RepoMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.full_name, "acme/api");
        assert_eq!(metadata.default_branch, "trunk");
        assert_eq!(metadata.stargazers_count, 12);
        assert!(metadata.pushed_at.is_some());
    }

    #[test]
    fn round_trips_through_artifact_shape() {
        let metadata = RepoMetadata {
            full_name: "acme/api".into(),
            default_branch: "main".into(),
            html_url: None,
            archived: true,
            stargazers_count: 0,
            forks_count: 0,
            pushed_at: None,
        };

        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["defaultBranch"], "main");
        assert_eq!(serde_json::from_value::<RepoMetadata>(json).unwrap(), metadata);
    }

    #[test]
    fn optional_fields_default() {
        let metadata: RepoMetadata = serde_json::from_str(r#"{"full_name":"a/b","default_branch":"main"}"#).unwrap();
        assert!(!metadata.archived);
        assert_eq!(metadata.forks_count, 0);
        assert_eq!(metadata.html_url, None);
    }
}
