use crate::cli::Args;
use crate::error::ApiError;
use chrono::{ Duration as ChronoDuration, SecondsFormat, Utc };
use log::warn;
use reqwest::header::{ AUTHORIZATION, USER_AGENT };
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use serde_json::json;

const LOOKBACK_DAYS: i64 = 365;

const CONTRIBUTIONS_QUERY: &str =
    r#"
query($login: String!, $from: DateTime!, $to: DateTime!) {
  user(login: $login) {
    contributionsCollection(from: $from, to: $to) {
      contributionCalendar {
        totalContributions
        weeks {
          contributionDays {
            date
            contributionCount
          }
        }
      }
    }
  }
}
"#;

#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub default_user: String,
    pub graphql_url: String,
}

impl GitHubConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            token: args.github_token.clone().filter(|t| !t.trim().is_empty()),
            default_user: args.github_user.clone(),
            graphql_url: args.github_graphql_url.clone(),
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub struct ContributionDay {
    pub date: String,
    pub count: u64,
    pub level: u8,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct Activity {
    pub total: u64,
    pub contributions: Vec<ContributionDay>,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<ResponseData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct ResponseData {
    user: Option<UserNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserNode {
    contributions_collection: Option<ContributionsCollection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionsCollection {
    contribution_calendar: Option<ContributionCalendar>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContributionCalendar {
    #[serde(default)]
    total_contributions: u64,
    #[serde(default)]
    weeks: Vec<Week>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Week {
    #[serde(default)]
    contribution_days: Vec<RawDay>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDay {
    date: String,
    #[serde(default)]
    contribution_count: u64,
}

/// Buckets a day's count into 0-4 relative to the busiest day. Zero is kept
/// for days without activity.
pub fn activity_level(count: u64, max: u64) -> u8 {
    if count == 0 || max == 0 {
        return 0;
    }
    let scaled = ((count as f64 / max as f64) * 4.0).ceil();
    scaled.clamp(1.0, 4.0) as u8
}

pub struct GitHubClient {
    http: HttpClient,
    config: GitHubConfig,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Self {
        Self { http: HttpClient::new(), config }
    }

    pub async fn activity(&self, user: Option<&str>) -> Result<Activity, ApiError> {
        let token = self.config.token.as_deref().ok_or_else(|| {
            ApiError::Config(
                "Missing GITHUB_TOKEN env var. Add a classic token with repo + read:user.".into()
            )
        })?;
        let login = user.filter(|u| !u.is_empty()).unwrap_or(&self.config.default_user);

        let to = Utc::now();
        let from = to - ChronoDuration::days(LOOKBACK_DAYS);
        let body =
            json!({
            "query": CONTRIBUTIONS_QUERY,
            "variables": {
                "login": login,
                "from": from.to_rfc3339_opts(SecondsFormat::Millis, true),
                "to": to.to_rfc3339_opts(SecondsFormat::Millis, true),
            }
        });

        let resp = self.http
            .post(&self.config.graphql_url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(USER_AGENT, concat!("portfolio-api/", env!("CARGO_PKG_VERSION")))
            .json(&body)
            .send().await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let status = resp.status();
        let parsed = resp
            .json::<GraphQlResponse>().await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let errors = parsed.errors.unwrap_or_default();
        if !status.is_success() || !errors.is_empty() {
            let joined = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            warn!("GitHub contributions for {} failed ({}): {}", login, status, joined);
            let message = if joined.is_empty() { "GitHub fetch failed".to_string() } else { joined };
            return Err(ApiError::Upstream(message));
        }

        let calendar = parsed.data
            .and_then(|d| d.user)
            .and_then(|u| u.contributions_collection)
            .and_then(|c| c.contribution_calendar);
        Ok(summarize(calendar))
    }
}

fn summarize(calendar: Option<ContributionCalendar>) -> Activity {
    let Some(calendar) = calendar else {
        return Activity { total: 0, contributions: Vec::new() };
    };
    let days: Vec<RawDay> = calendar.weeks
        .into_iter()
        .flat_map(|w| w.contribution_days)
        .collect();
    let max = days
        .iter()
        .map(|d| d.contribution_count)
        .max()
        .unwrap_or(0);

    Activity {
        total: calendar.total_contributions,
        contributions: days
            .into_iter()
            .map(|d| ContributionDay {
                level: activity_level(d.contribution_count, max),
                count: d.contribution_count,
                date: d.date,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_scale_against_busiest_day() {
        assert_eq!(activity_level(0, 10), 0);
        assert_eq!(activity_level(5, 0), 0);
        assert_eq!(activity_level(1, 10), 1);
        assert_eq!(activity_level(3, 10), 2);
        assert_eq!(activity_level(5, 10), 2);
        assert_eq!(activity_level(6, 10), 3);
        assert_eq!(activity_level(10, 10), 4);
    }

    #[test]
    fn flattens_weeks_in_order() {
        let calendar: ContributionCalendar = serde_json::from_value(
            json!({
            "totalContributions": 6,
            "weeks": [
                { "contributionDays": [
                    { "date": "2026-01-01", "contributionCount": 0 },
                    { "date": "2026-01-02", "contributionCount": 4 }
                ]},
                { "contributionDays": [{ "date": "2026-01-03", "contributionCount": 2 }] }
            ]
        })
        ).unwrap();
        let activity = summarize(Some(calendar));
        assert_eq!(activity.total, 6);
        assert_eq!(
            activity.contributions,
            vec![
                ContributionDay { date: "2026-01-01".into(), count: 0, level: 0 },
                ContributionDay { date: "2026-01-02".into(), count: 4, level: 4 },
                ContributionDay { date: "2026-01-03".into(), count: 2, level: 2 }
            ]
        );
    }

    #[test]
    fn missing_calendar_is_empty() {
        assert_eq!(summarize(None), Activity { total: 0, contributions: Vec::new() });
    }
}
