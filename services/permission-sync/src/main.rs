//! Permission Sync - 本地开发入口
//!
//! 从 JSON 夹具初始化内存存储，预热所有主体并打印解析结果，
//! 随后持续输出变更通知直到 Ctrl-C

use std::sync::Arc;

use org_common::PrincipalId;
use org_config::AppConfig;
use permission_sync::{
    ChangeCallback, InMemoryPermissionStore, PermissionFacade, PermissionFixture, PermissionStore,
};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir)?;

    org_telemetry::init_tracing(&config.telemetry.log_level, config.telemetry.json)?;
    let _metrics = org_telemetry::init_metrics()?;

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Starting permission sync"
    );

    let store = match std::env::var("PERMISSION_FIXTURES") {
        Ok(path) => {
            info!(path = %path, "Loading permission fixtures");
            Arc::new(InMemoryPermissionStore::from_fixture(
                PermissionFixture::from_file(&path)?,
            ))
        }
        Err(_) => {
            warn!("PERMISSION_FIXTURES not set, starting with an empty store");
            Arc::new(InMemoryPermissionStore::new())
        }
    };

    let principals = store.principals();
    let facade = PermissionFacade::from_config(
        Arc::clone(&store) as Arc<dyn PermissionStore>,
        &config.permissions,
    );

    let report = facade.warm(&principals).await;
    for (principal_id, error) in &report.failed {
        warn!(principal_id = %principal_id, error = %error, "Principal not loaded");
    }

    let mut handles = Vec::with_capacity(principals.len());
    for principal_id in &principals {
        log_principal(&facade, principal_id);

        let watcher = facade.clone();
        let on_change: ChangeCallback = Arc::new(move |changed: &PrincipalId| {
            info!(principal_id = %changed, "Permissions changed, reloading");
            let watcher = watcher.clone();
            let changed = changed.clone();
            tokio::spawn(async move {
                if watcher.cache().get_or_load(&changed).await.is_ok() {
                    log_principal(&watcher, &changed);
                }
            });
        });
        handles.push(facade.subscribe(principal_id, on_change));
    }

    info!(
        principals = principals.len(),
        "Permission sync ready, press Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await?;

    for handle in &handles {
        facade.unsubscribe(handle);
    }
    info!(stats = ?facade.stats(), "Permission sync stopped");
    Ok(())
}

fn log_principal(facade: &PermissionFacade, principal_id: &PrincipalId) {
    let codes = facade.permissions(principal_id).codes();
    info!(
        principal_id = %principal_id,
        role = ?facade.role(principal_id),
        flags = ?facade.role_flags(principal_id),
        permissions = ?codes,
        "Resolved permissions"
    );
}
