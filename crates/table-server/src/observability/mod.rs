//! Observability for the table server.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `table_connections_active` | Gauge | none | Open WebSocket connections |
//! | `table_waiting_room_depth` | Gauge | none | Participants waiting for a cohort |
//! | `table_sessions_active` | Gauge | none | Sessions held by the registry |
//! | `table_cohorts_dispatched_total` | Counter | none | Cohorts handed to the registry |
//! | `table_cohorts_dropped_total` | Counter | none | Cohorts discarded during shutdown |
//! | `table_sessions_finished_total` | Counter | `reason` | Finished sessions |
//! | `table_disconnect_purges_total` | Counter | `component` | Entries purged on disconnect |
//! | `table_session_panics_total` | Counter | none | Session tasks that died unfinished |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
