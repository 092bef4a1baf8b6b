use std::path::{Path, PathBuf};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Config;
use reconkit_core::{Error, Result};
use tracing::{info, warn};

/// Where connection parameters come from.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Explicit kubeconfig file. When unset, `KUBECONFIG` (possibly several
    /// paths joined by the platform separator) or `~/.kube/config` is inferred.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to select; the current context when unset.
    pub context: Option<String>,
}

/// Resolve a client configuration: kubeconfig first, then the in-cluster service account.
///
/// Only when both sources fail is a `Configuration` error returned.
pub async fn load_config(opts: &ConnectOptions) -> Result<Config> {
    let primary = match &opts.kubeconfig {
        Some(path) => from_kubeconfig(path, opts.context.clone()).await,
        None => Config::infer().await.map_err(|e| e.to_string()),
    };
    match primary {
        Ok(cfg) => {
            info!(cluster = %cfg.cluster_url, "using kubeconfig");
            Ok(cfg)
        }
        Err(kube_err) => {
            warn!(error = %kube_err, "kubeconfig unavailable; trying in-cluster configuration");
            match Config::incluster() {
                Ok(cfg) => {
                    info!(cluster = %cfg.cluster_url, "using in-cluster configuration");
                    Ok(cfg)
                }
                Err(e) => Err(Error::Configuration(format!("kubeconfig: {}; in-cluster: {}", kube_err, e))),
            }
        }
    }
}

async fn from_kubeconfig(path: &Path, context: Option<String>) -> std::result::Result<Config, String> {
    let kc = Kubeconfig::read_from(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    let opts = KubeConfigOptions { context, ..Default::default() };
    Config::from_custom_kubeconfig(kc, &opts).await.map_err(|e| e.to_string())
}
