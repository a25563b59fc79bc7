//! Navigation item model

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Navigation link shown in the site header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItem {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    /// Absolute URL or site-relative path
    pub url: String,
    pub open_new_tab: bool,
    pub sort_order: i32,
    pub visible: bool,
}

impl NavItem {
    pub fn new(title: String, url: String) -> Self {
        Self {
            id: 0,
            parent_id: None,
            title,
            url,
            open_new_tab: false,
            sort_order: 0,
            visible: true,
        }
    }
}

/// Navigation item with children (tree structure)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItemTree {
    #[serde(flatten)]
    pub item: NavItem,
    pub children: Vec<NavItemTree>,
}

impl NavItemTree {
    pub fn new(item: NavItem) -> Self {
        Self {
            item,
            children: Vec::new(),
        }
    }
}

/// Input for creating a nav item
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateNavItemInput {
    pub parent_id: Option<i64>,
    #[validate(length(min = 1, max = 50, message = "Title must be 1 to 50 characters"))]
    pub title: String,
    #[validate(length(min = 1, max = 500, message = "URL must be 1 to 500 characters"))]
    pub url: String,
    #[serde(default)]
    pub open_new_tab: bool,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

fn default_visible() -> bool {
    true
}

/// Input for updating a nav item
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateNavItemInput {
    /// `Some(None)` moves the item to the top level
    #[serde(default, with = "double_option")]
    pub parent_id: Option<Option<i64>>,
    #[validate(length(min = 1, max = 50, message = "Title must be 1 to 50 characters"))]
    pub title: Option<String>,
    #[validate(length(min = 1, max = 500, message = "URL must be 1 to 500 characters"))]
    pub url: Option<String>,
    pub open_new_tab: Option<bool>,
    pub sort_order: Option<i32>,
    pub visible: Option<bool>,
}

/// One entry of a reorder request
#[derive(Debug, Clone, Deserialize)]
pub struct NavOrderItem {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub sort_order: i32,
}

/// Distinguishes an absent field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<i64>::deserialize(deserializer).map(Some)
    }
}
