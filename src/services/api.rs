use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::ApiConfig;
use crate::error::Result;
use crate::services::database::DatabaseService;
use crate::services::stats::ClusterStats;

/// Worker hashrate estimate in TH/s: summed difficulty over the 10 minute
/// window, one share per `2^32 / difficulty` hashes, averaged over 300s.
fn hashrate_ths(difficulty: f64) -> String {
    format!("{:.2}", difficulty * 2f64.powi(32) / 300.0 / 1e12)
}

#[derive(Debug, Serialize)]
struct WorkerEntry {
    name: String,
    s: i64,
    h: String,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    miners: i64,
    acc: i64,
    rej: i64,
    nodes: i64,
    workers: Vec<WorkerEntry>,
}

#[derive(Clone)]
pub struct ApiState {
    pub stats: Arc<ClusterStats>,
    pub database: Option<Arc<DatabaseService>>,
}

/// Cluster dashboard server. Returns a future that runs until the process
/// shuts down; binding failures are reported before the future is returned.
pub async fn start_api_server(
    config: &ApiConfig,
    state: ApiState,
) -> Result<impl std::future::Future<Output = ()>> {
    let app = Router::new()
        .route("/api/stats", get(get_stats))
        .route("/", get(get_dashboard))
        .route("/stats", get(get_dashboard))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("stats API listening on {}", config.bind);

    Ok(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("stats API server error: {}", e);
        }
    })
}

async fn get_stats(
    State(state): State<ApiState>,
) -> std::result::Result<([(header::HeaderName, &'static str); 1], Json<StatsResponse>), StatusCode>
{
    let cors = [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")];

    if let Some(db) = state.database.as_ref().filter(|db| db.has_stats()) {
        match cluster_response(db).await {
            Ok(response) => return Ok((cors, Json(response))),
            Err(e) => {
                warn!("cluster stats query failed, serving local view: {}", e);
            }
        }
    }

    // No stats database (or it is unreachable): degrade to this node alone.
    let snapshot = state.stats.snapshot();
    Ok((
        cors,
        Json(StatsResponse {
            miners: snapshot.connected_miners as i64,
            acc: snapshot.shares_accepted as i64,
            rej: snapshot.shares_rejected as i64,
            nodes: 1,
            workers: Vec::new(),
        }),
    ))
}

async fn cluster_response(db: &DatabaseService) -> Result<StatsResponse> {
    let totals = db.cluster_totals().await?.unwrap_or_default();
    let workers = db
        .recent_workers()
        .await?
        .into_iter()
        .map(|w| WorkerEntry {
            name: w.name,
            s: w.shares,
            h: hashrate_ths(w.difficulty),
        })
        .collect();

    Ok(StatsResponse {
        miners: totals.miners,
        acc: totals.accepted,
        rej: totals.rejected,
        nodes: totals.nodes.max(1),
        workers,
    })
}

async fn get_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html><html><head><title>Proxy Cluster</title><style>body{background:#0f172a;color:#fff;font-family:sans-serif;padding:2rem}.grid{display:grid;grid-template-columns:repeat(auto-fit,minmax(200px,1fr));gap:1rem;margin:2rem 0}.card{background:#1e293b;padding:1.5rem;border-radius:12px;border:1px solid #334155}.val{font-size:2rem;font-weight:bold}table{width:100%;border-collapse:collapse;background:#1e293b;border-radius:12px;overflow:hidden}th,td{padding:1rem;text-align:left;border-bottom:1px solid #334155}th{color:#94a3b8;font-size:.8rem;text-transform:uppercase}h1{color:#3b82f6}.badge{background:#3b82f6;padding:.2rem .5rem;border-radius:4px;font-size:.8rem;margin-left:1rem}</style></head><body><h1>REAL-TIME CLUSTER <span class="badge" id="n">1 NODE</span></h1><div class="grid"><div class="card">Total Miners<div class="val" id="m">0</div></div><div class="card">Total Accepted<div class="val" style="color:#22c55e" id="a">0</div></div><div class="card">Total Rejected<div class="val" style="color:#ef4444" id="r">0</div></div></div><table><thead><tr><th>Worker Name</th><th>Shares</th><th>Hashrate (TH/s)</th></tr></thead><tbody id="list"></tbody></table><script>function u(){fetch('/api/stats').then(r=>r.json()).then(d=>{document.getElementById('m').textContent=d.miners;document.getElementById('a').textContent=d.acc;document.getElementById('r').textContent=d.rej;document.getElementById('n').textContent=d.nodes+' NODES ACTIVE';let h='';d.workers.forEach(w=>{h+='<tr><td>'+w.name+'</td><td>'+w.s+'</td><td>'+w.h+'</td></tr>'});document.getElementById('list').innerHTML=h})}setInterval(u,3000);u()</script></body></html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashrate_estimate_matches_dashboard_units() {
        // One share at difficulty 70_000 over 5 minutes is ~1 TH/s.
        assert_eq!(hashrate_ths(69_849.0), "1.00");
        assert_eq!(hashrate_ths(0.0), "0.00");
    }
}
