use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct ServeConfig {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct AgentConfig {
    pub url: Option<String>,
    pub ca: Option<PathBuf>,
    pub verify_hostname: Option<bool>,
    pub agent_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub serve: Option<ServeConfig>,
    pub agent: Option<AgentConfig>,
}

/// Load `path`, or `./gate.yaml` when no path is given. Missing or malformed
/// files yield `None`.
pub fn load_config(path: Option<&Path>) -> Option<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => {
            let p = Path::new("gate.yaml");
            if p.exists() { p.to_path_buf() } else { return None; }
        }
    };
    let s = fs::read_to_string(path).ok()?;
    parse(&s)
}

fn parse(s: &str) -> Option<Config> {
    serde_yaml::from_str(s).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_sections() {
        let cfg = parse(
            "serve:\n  port: 9443\n  bind: 127.0.0.1\n  storage_dir: /var/lib/gate\nagent:\n  url: wss://target.lan:9443\n  verify_hostname: false\n",
        )
        .unwrap();
        let serve = cfg.serve.unwrap();
        assert_eq!(serve.port, Some(9443));
        assert_eq!(serve.bind, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(serve.storage_dir, Some(PathBuf::from("/var/lib/gate")));
        assert_eq!(serve.cert, None);
        let agent = cfg.agent.unwrap();
        assert_eq!(agent.url.as_deref(), Some("wss://target.lan:9443"));
        assert_eq!(agent.verify_hostname, Some(false));
    }

    #[test]
    fn malformed_yaml_is_ignored() {
        assert_eq!(parse("serve: [unterminated"), None);
        assert_eq!(parse("serve:\n  port: not-a-port\n"), None);
    }

    #[test]
    fn missing_file_is_ignored() {
        assert_eq!(load_config(Some(Path::new("/nonexistent/gate.yaml"))), None);
    }
}
