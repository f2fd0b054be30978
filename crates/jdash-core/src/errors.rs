//! User-facing error labels recorded in the store. The strings are what a
//! presentation layer shows in its banners.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelsError {
    LoadAllModels,
    LoadSomeModels,
    LoadLatestModels,
    ListOrUpdateModels,
}

impl ModelsError {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelsError::LoadAllModels => "Unable to load models.",
            ModelsError::LoadSomeModels => "Unable to load some models.",
            ModelsError::LoadLatestModels => "Unable to load latest model data.",
            ModelsError::ListOrUpdateModels => "Unable to list or update models.",
        }
    }
}

impl fmt::Display for ModelsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoginErrorLabel {
    Log,
    NoInfo,
}

impl LoginErrorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginErrorLabel::Log => "Unable to log into controller.",
            LoginErrorLabel::NoInfo => "Unable to retrieve controller details.",
        }
    }
}

impl fmt::Display for LoginErrorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatcherErrorLabel {
    NoConnection,
    NoId,
}

impl WatcherErrorLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherErrorLabel::NoConnection => "Could not connect to model",
            WatcherErrorLabel::NoId => "Could not watch model for changes",
        }
    }
}

impl fmt::Display for WatcherErrorLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditLogsError {
    CheckPermissions,
}

impl AuditLogsError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLogsError::CheckPermissions => "Unable to check Audit Logs user permission.",
        }
    }
}

impl fmt::Display for AuditLogsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const CONTROLLER_LIST_ERROR: &str = "Unable to fetch the list of controllers.";
