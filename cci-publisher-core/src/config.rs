use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Viewer link attached to WMS-enabled aggregations. `{WMS}` is filled in by the viewer.
pub const DEFAULT_WMS_VIEWER_URL: &str = "http://jasmin.eofrom.space/?wms_url={WMS}\
?service=WMS&version=1.3.0&request=GetCapabilities,GISportal Viewer";

/// Where published artifacts live on the serving side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Directory the NcML files are served from on the THREDDS host.
    pub aggregations_dir: String,
    /// Host name of the THREDDS server.
    pub thredds_server: String,
    #[serde(default = "default_true")]
    pub do_wcs: bool,
    #[serde(default = "default_viewer_url")]
    pub wms_viewer_url: String,
}

fn default_true() -> bool {
    true
}

fn default_viewer_url() -> String {
    DEFAULT_WMS_VIEWER_URL.to_string()
}

impl RemoteSettings {
    pub fn new(aggregations_dir: impl Into<String>, thredds_server: impl Into<String>) -> Self {
        Self {
            aggregations_dir: aggregations_dir.into(),
            thredds_server: thredds_server.into(),
            do_wcs: true,
            wms_viewer_url: default_viewer_url(),
        }
    }
}

/// Everything the core pipeline needs to know about its surroundings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSettings {
    /// Local checkout of the THREDDS catalog repository.
    pub catalog_repo: PathBuf,
    pub remote: RemoteSettings,
}

impl PublisherSettings {
    pub fn trace_loaded(&self) {
        info!(
            catalog_repo = %self.catalog_repo.display(),
            thredds_server = %self.remote.thredds_server,
            aggregations_dir = %self.remote.aggregations_dir,
            do_wcs = self.remote.do_wcs,
            "[CONFIG] Loaded publisher settings"
        );
        debug!(?self, "[CONFIG] Publisher settings (full debug)");
    }
}
