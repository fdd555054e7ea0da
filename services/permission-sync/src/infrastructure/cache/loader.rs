//! 从存储加载并解析单个主体的权限

use org_common::{PrincipalId, RetryConfig, with_conditional_retry};
use org_errors::{AppError, AppResult};
use tracing::debug;

use crate::domain::{PermissionMap, PermissionResolver, PermissionStore, Role};

/// 读取角色、角色默认权限和覆盖，返回解析后的映射
///
/// 瞬时错误按 `retry` 重试；角色默认权限与覆盖并发读取
pub async fn load_permissions(
    store: &dyn PermissionStore,
    principal_id: &PrincipalId,
    retry: &RetryConfig,
) -> AppResult<(Role, PermissionMap)> {
    let role = with_conditional_retry(
        retry,
        "fetch_role",
        || store.fetch_role(principal_id),
        AppError::is_retryable,
    )
    .await?;

    let (defaults, overrides) = tokio::try_join!(
        with_conditional_retry(
            retry,
            "fetch_role_defaults",
            || store.fetch_role_defaults(&role),
            AppError::is_retryable,
        ),
        with_conditional_retry(
            retry,
            "fetch_overrides",
            || store.fetch_overrides(principal_id),
            AppError::is_retryable,
        ),
    )?;

    if defaults.is_none() {
        debug!(
            principal_id = %principal_id,
            role = %role,
            "Role has no defaults in store, resolving to empty permission map"
        );
    }

    let permissions = PermissionResolver::resolve(defaults.as_ref(), &overrides);
    Ok((role, permissions))
}
