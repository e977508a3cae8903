use crate::db::models::{Camera, CameraPayload};
use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A dashboard groups at most this many cameras
pub const MAX_CAMERAS_PER_DASHBOARD: usize = 3;

const MAX_DASHBOARD_ID_LEN: usize = 50;
const MAX_NAME_LEN: usize = 100;

/// Risk level of a dashboard, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
            RiskLevel::Critical => "Critical",
        }
    }

    /// Hex color used by the dashboard badge
    pub fn color(&self) -> &'static str {
        match self {
            RiskLevel::Low => "#10b981",
            RiskLevel::Medium => "#f59e0b",
            RiskLevel::High => "#ef4444",
            RiskLevel::Critical => "#dc2626",
        }
    }

    /// Next level up, `None` at critical
    pub fn escalate(&self) -> Option<RiskLevel> {
        match self {
            RiskLevel::Low => Some(RiskLevel::Medium),
            RiskLevel::Medium => Some(RiskLevel::High),
            RiskLevel::High => Some(RiskLevel::Critical),
            RiskLevel::Critical => None,
        }
    }

    /// Next level down, `None` at low
    pub fn deescalate(&self) -> Option<RiskLevel> {
        match self {
            RiskLevel::Low => None,
            RiskLevel::Medium => Some(RiskLevel::Low),
            RiskLevel::High => Some(RiskLevel::Medium),
            RiskLevel::Critical => Some(RiskLevel::High),
        }
    }

    pub fn info(&self) -> RiskLevelInfo {
        RiskLevelInfo {
            value: *self,
            display: self.display_name(),
            color: self.color(),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = Error;

    // Values are matched exactly, as stored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskLevel::ALL
            .iter()
            .copied()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Invalid risk level '{}'. Valid values: low, medium, high, critical",
                    s
                ))
            })
    }
}

/// Value, label and color of one risk level
#[derive(Debug, Clone, Serialize)]
pub struct RiskLevelInfo {
    pub value: RiskLevel,
    pub display: &'static str,
    pub color: &'static str,
}

/// Reject an attach when the dashboard is already full
pub fn ensure_capacity(current: usize) -> Result<(), Error> {
    if current >= MAX_CAMERAS_PER_DASHBOARD {
        return Err(Error::Validation(format!(
            "Dashboard already has {} cameras (maximum allowed)",
            MAX_CAMERAS_PER_DASHBOARD
        )));
    }
    Ok(())
}

/// Dashboard model
#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    #[serde(skip_serializing)]
    pub id: Uuid,
    pub dashboard_id: String,
    pub name: String,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database row of a dashboard, risk level kept as text
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DashboardDb {
    pub id: Uuid,
    pub dashboard_id: String,
    pub name: String,
    pub risk_level: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DashboardDb> for Dashboard {
    type Error = Error;

    fn try_from(db: DashboardDb) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            dashboard_id: db.dashboard_id,
            name: db.name,
            risk_level: db.risk_level.parse()?,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

/// Dashboard together with its cameras, in attach order
#[derive(Debug, Clone, Serialize)]
pub struct DashboardWithCameras {
    #[serde(flatten)]
    pub dashboard: Dashboard,
    pub risk_display: &'static str,
    pub risk_color: &'static str,
    pub cameras: Vec<Camera>,
}

impl DashboardWithCameras {
    pub fn new(dashboard: Dashboard, cameras: Vec<Camera>) -> Self {
        Self {
            risk_display: dashboard.risk_level.display_name(),
            risk_color: dashboard.risk_level.color(),
            dashboard,
            cameras,
        }
    }
}

/// Request body for dashboard creation
#[derive(Debug, Clone, Deserialize)]
pub struct NewDashboard {
    pub dashboard_id: String,
    pub name: String,
    #[serde(default)]
    pub risk: Option<String>,
    #[serde(default)]
    pub camera_ids: Vec<String>,
}

impl NewDashboard {
    /// Check the request and return the initial risk level
    pub fn validate(&self) -> Result<RiskLevel, Error> {
        let dashboard_id = self.dashboard_id.trim();
        if dashboard_id.is_empty() {
            return Err(Error::Validation("dashboard_id may not be blank".to_string()));
        }
        if dashboard_id.chars().count() > MAX_DASHBOARD_ID_LEN {
            return Err(Error::Validation(format!(
                "dashboard_id may not exceed {} characters",
                MAX_DASHBOARD_ID_LEN
            )));
        }
        validate_name(&self.name)?;

        let mut unique = self.camera_ids.clone();
        unique.sort();
        unique.dedup();
        if unique.len() != self.camera_ids.len() {
            return Err(Error::Validation("camera_ids contains duplicates".to_string()));
        }
        if self.camera_ids.len() > MAX_CAMERAS_PER_DASHBOARD {
            return Err(Error::Validation(format!(
                "Dashboard already has {} cameras (maximum allowed)",
                MAX_CAMERAS_PER_DASHBOARD
            )));
        }

        match self.risk.as_deref() {
            Some(risk) => risk.parse(),
            None => Ok(RiskLevel::default()),
        }
    }
}

/// Request body for renaming a dashboard
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardUpdate {
    pub name: String,
}

impl DashboardUpdate {
    pub fn validate(&self) -> Result<(), Error> {
        validate_name(&self.name)
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(Error::Validation("name may not be blank".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "name may not exceed {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Request body of the add-camera endpoint: a new camera to create and attach
pub type NewDashboardCamera = CameraPayload;

/// Requested risk change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTransition {
    To(RiskLevel),
    Escalate,
    Deescalate,
}

impl RiskTransition {
    /// Level the dashboard moves to from `current`
    pub fn target(&self, current: RiskLevel) -> Result<RiskLevel, Error> {
        match self {
            RiskTransition::To(level) => Ok(*level),
            RiskTransition::Escalate => current.escalate().ok_or_else(|| {
                Error::Validation(format!(
                    "Risk level is already at the maximum ({})",
                    current.display_name()
                ))
            }),
            RiskTransition::Deescalate => current.deescalate().ok_or_else(|| {
                Error::Validation(format!(
                    "Risk level is already at the minimum ({})",
                    current.display_name()
                ))
            }),
        }
    }
}

/// Request body of the update-risk endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RiskUpdateRequest {
    pub risk: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Optional body of the escalate/de-escalate endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RiskStepRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// One entry of a dashboard's risk history
#[derive(Debug, Clone, Serialize)]
pub struct RiskChange {
    pub id: Uuid,
    pub dashboard_id: String,
    pub previous_level: RiskLevel,
    pub new_level: RiskLevel,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RiskChangeDb {
    pub id: Uuid,
    pub dashboard_id: String,
    pub previous_level: String,
    pub new_level: String,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl TryFrom<RiskChangeDb> for RiskChange {
    type Error = Error;

    fn try_from(db: RiskChangeDb) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db.id,
            dashboard_id: db.dashboard_id,
            previous_level: db.previous_level.parse()?,
            new_level: db.new_level.parse()?,
            reason: db.reason,
            changed_at: db.changed_at,
        })
    }
}

/// Result of a successful risk transition
#[derive(Debug, Clone, Serialize)]
pub struct RiskUpdate {
    pub dashboard_id: String,
    pub old_risk: RiskLevel,
    pub new_risk: RiskLevel,
    pub new_risk_display: &'static str,
    pub new_risk_color: &'static str,
    pub updated_at: DateTime<Utc>,
}

impl RiskUpdate {
    pub fn new(
        dashboard_id: String,
        old_risk: RiskLevel,
        new_risk: RiskLevel,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dashboard_id,
            old_risk,
            new_risk,
            new_risk_display: new_risk.display_name(),
            new_risk_color: new_risk.color(),
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::High < RiskLevel::Critical);
        let mut sorted = RiskLevel::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, RiskLevel::ALL.to_vec());
    }

    #[test]
    fn display_data_matches_badges() {
        assert_eq!(RiskLevel::Low.color(), "#10b981");
        assert_eq!(RiskLevel::Medium.color(), "#f59e0b");
        assert_eq!(RiskLevel::High.color(), "#ef4444");
        assert_eq!(RiskLevel::Critical.color(), "#dc2626");
        assert_eq!(RiskLevel::Critical.display_name(), "Critical");
    }

    #[test]
    fn parses_only_known_levels() {
        assert_eq!("high".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        for raw in ["severe", "HIGH", "High", " high ", "critical\n", ""] {
            assert!(
                matches!(raw.parse::<RiskLevel>(), Err(Error::Validation(_))),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn serializes_as_lowercase_value() {
        let json = serde_json::to_value(RiskLevel::Medium.info()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"value": "medium", "display": "Medium", "color": "#f59e0b"})
        );
    }

    #[test]
    fn escalation_stops_at_the_ends() {
        assert_eq!(
            RiskTransition::Escalate.target(RiskLevel::High).unwrap(),
            RiskLevel::Critical
        );
        assert!(RiskTransition::Escalate.target(RiskLevel::Critical).is_err());
        assert!(RiskTransition::Deescalate.target(RiskLevel::Low).is_err());
        assert_eq!(
            RiskTransition::To(RiskLevel::Low)
                .target(RiskLevel::Critical)
                .unwrap(),
            RiskLevel::Low
        );
    }

    #[test]
    fn capacity_allows_up_to_three() {
        assert!(ensure_capacity(2).is_ok());
        match ensure_capacity(3) {
            Err(Error::Validation(msg)) => {
                assert_eq!(msg, "Dashboard already has 3 cameras (maximum allowed)")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn new_dashboard_rejects_too_many_cameras() {
        let request = NewDashboard {
            dashboard_id: "north".to_string(),
            name: "North wing".to_string(),
            risk: None,
            camera_ids: vec!["a", "b", "c", "d"].into_iter().map(String::from).collect(),
        };
        assert!(matches!(request.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn new_dashboard_defaults_to_low_risk() {
        let request = NewDashboard {
            dashboard_id: "north".to_string(),
            name: "North wing".to_string(),
            risk: None,
            camera_ids: vec!["a".to_string()],
        };
        assert_eq!(request.validate().unwrap(), RiskLevel::Low);
        assert_eq!(RiskLevel::default(), RiskLevel::Low);
    }
}
