use crate::cli::Args;
use crate::error::ApiError;
use chrono::Utc;
use log::{ error, warn };
use reqwest::header::AUTHORIZATION;
use reqwest::Client as HttpClient;
use serde::Serialize;
use serde_json::{ Map, Value as JsonValue };
use std::collections::HashMap;
use std::time::Duration;
use sysinfo::{ Disks, Networks, ProcessStatus, System, MINIMUM_CPU_UPDATE_INTERVAL };

pub const LOCAL_SERVER: &str = "local";
const TOP_PROCESSES: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct SystemConfig {
    pub remotes: HashMap<String, String>,
    pub stats_token: String,
}

impl SystemConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            remotes: args.remote_servers.as_deref().map(parse_remote_servers).unwrap_or_default(),
            stats_token: args.stats_token.clone(),
        }
    }
}

/// Parses `REMOTE_SERVERS`, tolerating the wrapping quotes and escaped inner
/// quotes some deploy dashboards add. Anything unparsable yields no remotes.
pub fn parse_remote_servers(raw: &str) -> HashMap<String, String> {
    let mut text = raw.trim();
    if text.len() >= 2 {
        let quoted =
            (text.starts_with('\'') && text.ends_with('\'')) ||
            (text.starts_with('"') && text.ends_with('"'));
        if quoted {
            text = &text[1..text.len() - 1];
        }
    }
    let text = text.replace("\\\"", "\"");
    if text.trim().is_empty() {
        return HashMap::new();
    }

    match serde_json::from_str::<Map<String, JsonValue>>(&text) {
        Ok(map) =>
            map
                .into_iter()
                .filter_map(|(name, url)| url.as_str().map(|u| (name, u.to_string())))
                .collect(),
        Err(e) => {
            error!("REMOTE_SERVERS env is invalid JSON ({}): {}", e, raw);
            HashMap::new()
        }
    }
}

#[derive(Serialize, Debug)]
pub struct CpuStats {
    pub model: String,
    pub load: Option<f32>,
    pub cores: Vec<f32>,
}

#[derive(Serialize, Debug)]
pub struct MemoryStats {
    pub used: u64,
    pub total: u64,
    pub percent: Option<f64>,
}

#[derive(Serialize, Debug)]
pub struct DiskStats {
    pub used: u64,
    pub size: u64,
    pub percent: Option<f64>,
    pub mount: String,
}

#[derive(Serialize, Debug)]
pub struct NetworkStats {
    pub rx_sec: f64,
    pub tx_sec: f64,
}

#[derive(Serialize, Debug)]
pub struct ProcessSummary {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub mem: f64,
}

#[derive(Serialize, Debug)]
pub struct ProcessStats {
    pub all: usize,
    pub running: usize,
    pub blocked: usize,
    pub top: Vec<ProcessSummary>,
}

#[derive(Serialize, Debug)]
pub struct LocalSnapshot {
    pub host: Option<String>,
    pub platform: String,
    pub cpu: CpuStats,
    pub mem: MemoryStats,
    pub disk: Option<DiskStats>,
    pub net: Option<NetworkStats>,
    pub procs: ProcessStats,
    pub time: i64,
    pub source: &'static str,
}

fn percent(part: u64, whole: u64) -> Option<f64> {
    if part == 0 || whole == 0 {
        return None;
    }
    Some((part as f64 / whole as f64) * 100.0)
}

/// Takes two samples `MINIMUM_CPU_UPDATE_INTERVAL` apart so CPU and network
/// rates have something to diff against.
fn sample_local() -> LocalSnapshot {
    let mut sys = System::new_all();
    let mut networks = Networks::new_with_refreshed_list();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    sys.refresh_memory();
    sys.refresh_processes();
    networks.refresh();
    let elapsed = MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(1)).as_secs_f64();

    let brand = sys
        .cpus()
        .first()
        .map(|cpu| format!("{} {}", cpu.vendor_id(), cpu.brand()).trim().to_string())
        .unwrap_or_default();
    let cpu = CpuStats {
        model: brand,
        load: if sys.cpus().is_empty() { None } else { Some(sys.global_cpu_info().cpu_usage()) },
        cores: sys
            .cpus()
            .iter()
            .map(|c| c.cpu_usage())
            .collect(),
    };

    let mem = MemoryStats {
        used: sys.used_memory(),
        total: sys.total_memory(),
        percent: percent(sys.used_memory(), sys.total_memory()),
    };

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .first()
        .map(|d| {
            let used = d.total_space().saturating_sub(d.available_space());
            DiskStats {
                used,
                size: d.total_space(),
                percent: percent(used, d.total_space()),
                mount: d.mount_point().display().to_string(),
            }
        });

    let net = networks
        .iter()
        .next()
        .map(|(_, data)| NetworkStats {
            rx_sec: (data.received() as f64) / elapsed,
            tx_sec: (data.transmitted() as f64) / elapsed,
        });

    let total_memory = sys.total_memory();
    let processes = sys.processes();
    let mut by_cpu: Vec<_> = processes.values().collect();
    by_cpu.sort_by(|a, b| b.cpu_usage().total_cmp(&a.cpu_usage()));
    let procs = ProcessStats {
        all: processes.len(),
        running: processes
            .values()
            .filter(|p| matches!(p.status(), ProcessStatus::Run))
            .count(),
        blocked: processes
            .values()
            .filter(|p| matches!(p.status(), ProcessStatus::UninterruptibleDiskSleep))
            .count(),
        top: by_cpu
            .into_iter()
            .take(TOP_PROCESSES)
            .map(|p| ProcessSummary {
                pid: p.pid().as_u32(),
                name: p.name().to_string(),
                cpu: p.cpu_usage(),
                mem: percent(p.memory(), total_memory).unwrap_or(0.0),
            })
            .collect(),
    };

    let platform = format!(
        "{} {}",
        System::name().unwrap_or_default(),
        System::os_version().unwrap_or_default()
    )
        .trim()
        .to_string();

    LocalSnapshot {
        host: System::host_name(),
        platform,
        cpu,
        mem,
        disk,
        net,
        procs,
        time: Utc::now().timestamp_millis(),
        source: LOCAL_SERVER,
    }
}

pub struct SystemMonitor {
    http: HttpClient,
    config: SystemConfig,
}

impl SystemMonitor {
    pub fn new(config: SystemConfig) -> Self {
        Self { http: HttpClient::new(), config }
    }

    pub fn remote_names(&self) -> Vec<&str> {
        self.config.remotes.keys().map(String::as_str).collect()
    }

    pub async fn stats(&self, server: Option<&str>) -> Result<JsonValue, ApiError> {
        match server.filter(|s| !s.is_empty()).unwrap_or(LOCAL_SERVER) {
            LOCAL_SERVER => self.local().await,
            name => self.remote(name).await,
        }
    }

    async fn local(&self) -> Result<JsonValue, ApiError> {
        let snapshot = tokio::task::spawn_blocking(sample_local).await.map_err(|e| {
            error!("Local stats sampling panicked: {}", e);
            ApiError::Internal("Failed to read local system stats".into())
        })?;
        serde_json::to_value(snapshot).map_err(|e| {
            error!("Local stats did not serialize: {}", e);
            ApiError::Internal("Failed to read local system stats".into())
        })
    }

    async fn remote(&self, name: &str) -> Result<JsonValue, ApiError> {
        let url = self.config.remotes
            .get(name)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown server \"{}\"", name)))?;
        let failed = || ApiError::Upstream(format!("Failed fetching \"{}\"", name));

        let resp = self.http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.config.stats_token))
            .send().await
            .map_err(|e| {
                warn!("Stats agent {} unreachable: {}", name, e);
                failed()
            })?;
        if !resp.status().is_success() {
            return Err(
                ApiError::Upstream(
                    format!("Remote server \"{}\" error: {}", name, resp.status().as_u16())
                )
            );
        }

        let mut data = resp.json::<Map<String, JsonValue>>().await.map_err(|e| {
            warn!("Stats agent {} sent unreadable JSON: {}", name, e);
            failed()
        })?;
        data.insert("source".into(), JsonValue::String(name.to_string()));
        Ok(JsonValue::Object(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_quoted_and_escaped_remotes() {
        let plain = parse_remote_servers(r#"{"nebula":"http://10.0.0.2:9100/stats"}"#);
        assert_eq!(plain.get("nebula").map(String::as_str), Some("http://10.0.0.2:9100/stats"));

        let quoted = parse_remote_servers(r#"'{"a":"http://a"}'"#);
        assert_eq!(quoted.get("a").map(String::as_str), Some("http://a"));

        let escaped = parse_remote_servers(r#""{ \"b\": \"http://b\" }""#);
        assert_eq!(escaped.get("b").map(String::as_str), Some("http://b"));
    }

    #[test]
    fn invalid_remotes_are_empty() {
        assert!(parse_remote_servers("not json").is_empty());
        assert!(parse_remote_servers("[1,2]").is_empty());
        assert!(parse_remote_servers("").is_empty());
    }

    #[tokio::test]
    async fn unknown_remote_is_not_found() {
        let monitor = SystemMonitor::new(SystemConfig::default());
        let err = monitor.stats(Some("ghost")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert_eq!(err.to_string(), "Unknown server \"ghost\"");
    }

    #[tokio::test]
    async fn local_snapshot_has_expected_shape() {
        let monitor = SystemMonitor::new(SystemConfig::default());
        let stats = monitor.stats(None).await.unwrap();
        assert_eq!(stats["source"], "local");
        assert!(stats["procs"]["top"].as_array().map(|t| t.len() <= 5).unwrap_or(false));
        assert!(stats["time"].is_i64());
    }
}
