use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

use crate::auth::auth;
use crate::models::{DiagnosticsResponse, ErrorResponse, Identity};
use crate::ws::hub::CollabHub;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Collaboration state counters plus process stats, admin only.
pub async fn diagnostics(
    State(hub): State<Arc<CollabHub>>,
    Extension(identity): Extension<Identity>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    auth::ensure_admin(&identity)?;

    let snapshot = hub.snapshot().await;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB, Conn: {}, Form rooms: {}, Video rooms: {}, Locks: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        snapshot.n_conn,
        snapshot.n_form_rooms,
        snapshot.n_video_rooms,
        snapshot.n_locks
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn: snapshot.n_conn as u32,
            n_form_rooms: snapshot.n_form_rooms as u32,
            n_video_rooms: snapshot.n_video_rooms as u32,
            n_video_participants: snapshot.n_video_participants as u32,
            n_locks: snapshot.n_locks as u32,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
