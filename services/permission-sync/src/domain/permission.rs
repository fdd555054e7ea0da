//! 权限模型
//!
//! 模块 × 操作 的封闭枚举，以及解析后的权限映射

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use org_errors::AppError;
use serde::{Deserialize, Serialize};

/// 受访问控制的功能模块
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Users,
    Members,
    Events,
    Finance,
    Assistance,
    Notifications,
    Reports,
    Settings,
}

impl Module {
    pub const ALL: [Module; 8] = [
        Module::Users,
        Module::Members,
        Module::Events,
        Module::Finance,
        Module::Assistance,
        Module::Notifications,
        Module::Reports,
        Module::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Users => "users",
            Module::Members => "members",
            Module::Events => "events",
            Module::Finance => "finance",
            Module::Assistance => "assistance",
            Module::Notifications => "notifications",
            Module::Reports => "reports",
            Module::Settings => "settings",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Module {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Module::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::validation(format!("unknown module: {}", s)))
    }
}

/// 对模块执行的操作
///
/// `Manage` 不隐含其他操作，只有存储显式给出时才成立
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    View,
    Create,
    Update,
    Delete,
    Manage,
    Export,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::View,
        Action::Create,
        Action::Update,
        Action::Delete,
        Action::Manage,
        Action::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Manage => "manage",
            Action::Export => "export",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::validation(format!("unknown action: {}", s)))
    }
}

/// 原子权限：一个 (模块, 操作) 对
///
/// 权限代码形如 `finance:view`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission {
    pub module: Module,
    pub action: Action,
}

impl Permission {
    pub const fn new(module: Module, action: Action) -> Self {
        Self { module, action }
    }

    /// 生成权限代码
    pub fn code(&self) -> String {
        format!("{}:{}", self.module, self.action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.action)
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, action) = s
            .split_once(':')
            .ok_or_else(|| AppError::validation(format!("malformed permission code: {}", s)))?;
        Ok(Self::new(module.parse()?, action.parse()?))
    }
}

impl TryFrom<String> for Permission {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.code()
    }
}

impl From<(Module, Action)> for Permission {
    fn from((module, action): (Module, Action)) -> Self {
        Self::new(module, action)
    }
}

/// 权限映射：模块 -> 允许的操作集合
///
/// 只保存至少有一个操作的模块；缺失的键表示该模块无任何权限。
/// 使用有序容器，相同输入总是得到结构上相等的映射。
/// 反序列化时丢弃空的操作集合。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<Module, BTreeSet<Action>>")]
pub struct PermissionMap {
    modules: BTreeMap<Module, BTreeSet<Action>>,
}

impl PermissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 (模块, 操作列表) 构建
    pub fn with(mut self, module: Module, actions: &[Action]) -> Self {
        for action in actions {
            self.insert(Permission::new(module, *action));
        }
        self
    }

    /// 授予所有模块的所有操作
    pub fn full() -> Self {
        Module::ALL
            .into_iter()
            .fold(Self::new(), |map, module| map.with(module, &Action::ALL))
    }

    pub fn allows(&self, module: Module, action: Action) -> bool {
        self.modules
            .get(&module)
            .is_some_and(|actions| actions.contains(&action))
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.allows(permission.module, permission.action)
    }

    pub fn actions(&self, module: Module) -> Option<&BTreeSet<Action>> {
        self.modules.get(&module)
    }

    pub fn modules(&self) -> impl Iterator<Item = Module> + '_ {
        self.modules.keys().copied()
    }

    /// 展开为原子权限
    pub fn permissions(&self) -> impl Iterator<Item = Permission> + '_ {
        self.modules.iter().flat_map(|(module, actions)| {
            actions
                .iter()
                .map(move |action| Permission::new(*module, *action))
        })
    }

    /// 所有权限代码，按模块和操作排序
    pub fn codes(&self) -> Vec<String> {
        self.permissions().map(|p| p.code()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 原子权限个数
    pub fn len(&self) -> usize {
        self.modules.values().map(BTreeSet::len).sum()
    }

    /// 集合并；返回是否新增
    pub fn insert(&mut self, permission: Permission) -> bool {
        self.modules
            .entry(permission.module)
            .or_default()
            .insert(permission.action)
    }

    /// 集合差；模块变空时删除键。返回是否删除
    pub fn remove(&mut self, permission: Permission) -> bool {
        let Some(actions) = self.modules.get_mut(&permission.module) else {
            return false;
        };
        let removed = actions.remove(&permission.action);
        if actions.is_empty() {
            self.modules.remove(&permission.module);
        }
        removed
    }
}

impl FromIterator<Permission> for PermissionMap {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        let mut map = Self::new();
        for permission in iter {
            map.insert(permission);
        }
        map
    }
}

impl From<BTreeMap<Module, BTreeSet<Action>>> for PermissionMap {
    fn from(modules: BTreeMap<Module, BTreeSet<Action>>) -> Self {
        modules
            .into_iter()
            .flat_map(|(module, actions)| {
                actions
                    .into_iter()
                    .map(move |action| Permission::new(module, action))
            })
            .collect()
    }
}

impl Serialize for PermissionMap {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.modules.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_code_roundtrip() {
        let perm = Permission::new(Module::Finance, Action::View);
        assert_eq!(perm.code(), "finance:view");
        assert_eq!("finance:view".parse::<Permission>().unwrap(), perm);
        assert_eq!("Finance:VIEW".parse::<Permission>().unwrap(), perm);
    }

    #[test]
    fn test_malformed_codes_rejected() {
        assert!("finance".parse::<Permission>().is_err());
        assert!("finance:fly".parse::<Permission>().is_err());
        assert!("garden:view".parse::<Permission>().is_err());
    }

    #[test]
    fn test_absent_module_means_no_permission() {
        let map = PermissionMap::new().with(Module::Events, &[Action::View]);
        assert!(map.allows(Module::Events, Action::View));
        assert!(!map.allows(Module::Events, Action::Delete));
        assert!(!map.allows(Module::Finance, Action::View));
        assert!(map.actions(Module::Finance).is_none());
    }

    #[test]
    fn test_manage_does_not_imply_other_actions() {
        let map = PermissionMap::new().with(Module::Finance, &[Action::Manage]);
        assert!(map.allows(Module::Finance, Action::Manage));
        assert!(!map.allows(Module::Finance, Action::View));
    }

    #[test]
    fn test_remove_drops_empty_module_key() {
        let mut map = PermissionMap::new().with(Module::Finance, &[Action::View]);
        assert!(map.remove(Permission::new(Module::Finance, Action::View)));
        assert!(map.is_empty());
        assert_eq!(map.modules().count(), 0);
        assert!(!map.remove(Permission::new(Module::Finance, Action::View)));
    }

    #[test]
    fn test_full_map_covers_everything() {
        let map = PermissionMap::full();
        assert_eq!(map.len(), Module::ALL.len() * Action::ALL.len());
        assert!(map.allows(Module::Settings, Action::Export));
    }

    #[test]
    fn test_serde_shape() {
        let map = PermissionMap::new().with(Module::Events, &[Action::View, Action::Create]);
        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json, serde_json::json!({ "events": ["view", "create"] }));

        let perm: Permission = serde_json::from_str("\"members:update\"").unwrap();
        assert_eq!(perm, Permission::new(Module::Members, Action::Update));
    }

    #[test]
    fn test_empty_action_sets_are_dropped_on_deserialize() {
        let map: PermissionMap = serde_json::from_str(r#"{"events": []}"#).unwrap();
        assert!(map.is_empty());
        assert_eq!(map, PermissionMap::new());

        let map: PermissionMap =
            serde_json::from_str(r#"{"events": [], "finance": ["view"]}"#).unwrap();
        assert_eq!(map.modules().collect::<Vec<_>>(), vec![Module::Finance]);
        assert_eq!(map.codes(), vec!["finance:view".to_string()]);
    }
}
