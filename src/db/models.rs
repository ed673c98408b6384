//! Database Models - structs representing database tables (used by sqlx/serde).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Case model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: i64,
    pub case_img: String,
    pub case_link: String,
    pub site_link: String,
    pub title_desktop: String,
    pub title_mobile: String,
    pub sphere: String,
    #[serde(rename = "sphere_color")]
    pub sphere_color: String,
    pub site_img: String,
    pub site_img_mobile: String,
    pub what: String,
    pub problem: String,
    pub aim: String,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// The three fixed image filenames.
    pub fn images(&self) -> [&str; 3] {
        [
            self.case_img.as_str(),
            self.site_img.as_str(),
            self.site_img_mobile.as_str(),
        ]
    }
}

/// Case section model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSection {
    pub id: i64,
    pub case_id: i64,
    pub position: i64,
    pub title: Option<String>,
    pub text: Option<String>,
    pub img: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Case with its ordered sections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseWithSections {
    #[serde(flatten)]
    pub case: Case,
    pub sections: Vec<CaseSection>,
}

impl CaseWithSections {
    /// Every image filename the case owns, fixed images first.
    pub fn all_images(&self) -> Vec<String> {
        self.case
            .images()
            .iter()
            .map(|s| s.to_string())
            .chain(self.sections.iter().filter_map(|s| s.img.clone()))
            .collect()
    }
}

/// Case list response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseList {
    pub count: i64,
    pub rows: Vec<CaseWithSections>,
}

/// New section for insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCaseSection {
    pub title: Option<String>,
    pub text: Option<String>,
    pub img: Option<String>,
}
