//! Landing page handler.

use axum::{extract::State, response::Html};
use tracing::{debug, instrument};

use crate::state::SharedState;

/// Handler for `/`.
#[instrument(skip(state))]
pub async fn index_handler(State(state): State<SharedState>) -> Html<String> {
    debug!("Processing / request");
    state.health_stats.record_http_request();
    Html(render_index(state.config.metrics_path()))
}

fn render_index(metrics_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>OPcache Exporter</title></head>\n\
         <body>\n\
         <h1>OPcache Exporter</h1>\n\
         <p><a href=\"{metrics_path}\">Metrics</a></p>\n\
         <p><a href=\"/doc\">Documentation</a></p>\n\
         </body>\n\
         </html>\n"
    )
}
