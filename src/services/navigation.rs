//! Navigation menu service
//!
//! Items form a forest through `parent_id`. Every write checks that the
//! result is still a forest: no item may be its own parent or ancestor.
//! The public tree holds visible items only and is cached under `nav`.

use std::collections::HashMap;
use std::sync::Arc;

use validator::{Validate, ValidationErrors};

use crate::cache::{keys, TaggedCache};
use crate::db::repositories::{build_nav_tree, NavItemRepository};
use crate::models::{CreateNavItemInput, NavItem, NavItemTree, NavOrderItem, UpdateNavItemInput};

const TREE_KEY: &str = "nav:tree";

#[derive(Debug, thiserror::Error)]
pub enum NavServiceError {
    #[error("Navigation item not found: {0}")]
    NotFound(i64),

    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct NavigationService {
    repo: Arc<dyn NavItemRepository>,
    cache: Arc<TaggedCache>,
}

impl NavigationService {
    pub fn new(repo: Arc<dyn NavItemRepository>, cache: Arc<TaggedCache>) -> Self {
        Self { repo, cache }
    }

    /// Visible items as a tree, for the public site
    pub async fn tree(&self) -> Result<Vec<NavItemTree>, NavServiceError> {
        let repo = &self.repo;
        let tree = self
            .cache
            .get_or_load(TREE_KEY, &[keys::NAV], || async move {
                Ok::<_, anyhow::Error>(build_nav_tree(repo.list_visible().await?))
            })
            .await?;
        Ok(tree)
    }

    /// Every item, hidden ones included, in menu order
    pub async fn list_flat(&self) -> Result<Vec<NavItem>, NavServiceError> {
        Ok(self.repo.list().await?)
    }

    pub async fn create(&self, input: CreateNavItemInput) -> Result<NavItem, NavServiceError> {
        input.validate()?;
        if let Some(parent_id) = input.parent_id {
            if self.repo.get_by_id(parent_id).await?.is_none() {
                return Err(NavServiceError::InvalidParent(format!("Parent {} does not exist", parent_id)));
            }
        }

        let item = NavItem {
            parent_id: input.parent_id,
            open_new_tab: input.open_new_tab,
            sort_order: input.sort_order,
            visible: input.visible,
            ..NavItem::new(input.title.trim().to_string(), input.url.trim().to_string())
        };
        let created = self.repo.create(&item).await?;
        self.bust().await;
        Ok(created)
    }

    pub async fn update(&self, id: i64, input: UpdateNavItemInput) -> Result<NavItem, NavServiceError> {
        input.validate()?;
        let mut item = self
            .repo
            .get_by_id(id)
            .await?
            .ok_or(NavServiceError::NotFound(id))?;

        if let Some(parent_id) = input.parent_id {
            if let Some(parent) = parent_id {
                let mut parents = self.parent_map().await?;
                if !parents.contains_key(&parent) {
                    return Err(NavServiceError::InvalidParent(format!("Parent {} does not exist", parent)));
                }
                parents.insert(id, Some(parent));
                check_forest(&parents)?;
            }
            item.parent_id = parent_id;
        }
        if let Some(title) = input.title {
            item.title = title.trim().to_string();
        }
        if let Some(url) = input.url {
            item.url = url.trim().to_string();
        }
        if let Some(open_new_tab) = input.open_new_tab {
            item.open_new_tab = open_new_tab;
        }
        if let Some(sort_order) = input.sort_order {
            item.sort_order = sort_order;
        }
        if let Some(visible) = input.visible {
            item.visible = visible;
        }

        self.repo.update(&item).await?;
        self.bust().await;
        Ok(item)
    }

    /// Move and re-sort items in one transaction
    pub async fn reorder(&self, items: Vec<NavOrderItem>) -> Result<(), NavServiceError> {
        let mut parents = self.parent_map().await?;
        for item in &items {
            if !parents.contains_key(&item.id) {
                return Err(NavServiceError::NotFound(item.id));
            }
            if let Some(parent) = item.parent_id {
                if !parents.contains_key(&parent) {
                    return Err(NavServiceError::InvalidParent(format!("Parent {} does not exist", parent)));
                }
            }
        }
        for item in &items {
            parents.insert(item.id, item.parent_id);
        }
        check_forest(&parents)?;

        self.repo.reorder(&items).await?;
        self.bust().await;
        Ok(())
    }

    /// Delete an item; its children go with it
    pub async fn delete(&self, id: i64) -> Result<(), NavServiceError> {
        if !self.repo.delete(id).await? {
            return Err(NavServiceError::NotFound(id));
        }
        self.bust().await;
        Ok(())
    }

    async fn parent_map(&self) -> Result<HashMap<i64, Option<i64>>, NavServiceError> {
        Ok(self
            .repo
            .list()
            .await?
            .into_iter()
            .map(|item| (item.id, item.parent_id))
            .collect())
    }

    async fn bust(&self) {
        self.cache.invalidate_tag(keys::NAV).await;
    }
}

/// Fail if following parents from any item revisits an item
fn check_forest(parents: &HashMap<i64, Option<i64>>) -> Result<(), NavServiceError> {
    for &start in parents.keys() {
        let mut current = parents.get(&start).copied().flatten();
        let mut steps = 0usize;
        while let Some(id) = current {
            if id == start {
                return Err(NavServiceError::InvalidParent(format!(
                    "Item {} would become its own ancestor",
                    start
                )));
            }
            steps += 1;
            if steps > parents.len() {
                // A cycle not through `start`; it is reported from its own members
                break;
            }
            current = parents.get(&id).copied().flatten();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;
    use crate::db::repositories::SqlxNavItemRepository;
    use crate::services::test_support::tagged_cache;

    async fn service() -> NavigationService {
        let pool = migrated_pool().await;
        NavigationService::new(SqlxNavItemRepository::boxed(pool), tagged_cache())
    }

    fn create_input(title: &str, parent_id: Option<i64>) -> CreateNavItemInput {
        CreateNavItemInput {
            parent_id,
            title: title.to_string(),
            url: format!("/{}", title.to_lowercase()),
            open_new_tab: false,
            sort_order: 10,
            visible: true,
        }
    }

    #[test]
    fn test_check_forest() {
        let ok: HashMap<i64, Option<i64>> = [(1, None), (2, Some(1)), (3, Some(2))].into();
        assert!(check_forest(&ok).is_ok());

        let self_parent: HashMap<i64, Option<i64>> = [(1, Some(1))].into();
        assert!(check_forest(&self_parent).is_err());

        let cycle: HashMap<i64, Option<i64>> = [(1, Some(3)), (2, Some(1)), (3, Some(2))].into();
        assert!(check_forest(&cycle).is_err());
    }

    #[tokio::test]
    async fn test_tree_includes_new_items() {
        let service = service().await;
        let seeded = service.tree().await.unwrap().len();

        let parent = service.create(create_input("Docs", None)).await.unwrap();
        service.create(create_input("Guide", Some(parent.id))).await.unwrap();

        let tree = service.tree().await.unwrap();
        assert_eq!(tree.len(), seeded + 1);
        let docs = tree.iter().find(|n| n.item.id == parent.id).unwrap();
        assert_eq!(docs.children.len(), 1);
        assert_eq!(docs.children[0].item.title, "Guide");
    }

    #[tokio::test]
    async fn test_hidden_items_leave_public_tree() {
        let service = service().await;
        let item = service.create(create_input("Secret", None)).await.unwrap();
        assert!(service.tree().await.unwrap().iter().any(|n| n.item.id == item.id));

        service
            .update(
                item.id,
                UpdateNavItemInput {
                    visible: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!service.tree().await.unwrap().iter().any(|n| n.item.id == item.id));
        assert!(service.list_flat().await.unwrap().iter().any(|i| i.id == item.id));
    }

    #[tokio::test]
    async fn test_update_rejects_self_and_descendant_parent() {
        let service = service().await;
        let a = service.create(create_input("A", None)).await.unwrap();
        let b = service.create(create_input("B", Some(a.id))).await.unwrap();

        let own = UpdateNavItemInput {
            parent_id: Some(Some(a.id)),
            ..Default::default()
        };
        assert!(matches!(
            service.update(a.id, own).await,
            Err(NavServiceError::InvalidParent(_))
        ));

        let under_child = UpdateNavItemInput {
            parent_id: Some(Some(b.id)),
            ..Default::default()
        };
        assert!(matches!(
            service.update(a.id, under_child).await,
            Err(NavServiceError::InvalidParent(_))
        ));

        let to_root = UpdateNavItemInput {
            parent_id: Some(None),
            ..Default::default()
        };
        assert_eq!(service.update(b.id, to_root).await.unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn test_reorder() {
        let service = service().await;
        let a = service.create(create_input("A", None)).await.unwrap();
        let b = service.create(create_input("B", None)).await.unwrap();

        service
            .reorder(vec![
                NavOrderItem { id: b.id, parent_id: Some(a.id), sort_order: 0 },
                NavOrderItem { id: a.id, parent_id: None, sort_order: -1 },
            ])
            .await
            .unwrap();

        let tree = service.tree().await.unwrap();
        assert_eq!(tree[0].item.id, a.id);
        assert_eq!(tree[0].children[0].item.id, b.id);

        let cyclic = vec![
            NavOrderItem { id: a.id, parent_id: Some(b.id), sort_order: 0 },
        ];
        assert!(matches!(
            service.reorder(cyclic).await,
            Err(NavServiceError::InvalidParent(_))
        ));
        assert!(matches!(
            service.reorder(vec![NavOrderItem { id: 9999, parent_id: None, sort_order: 0 }]).await,
            Err(NavServiceError::NotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let service = service().await;
        let item = service.create(create_input("Tmp", None)).await.unwrap();
        service.delete(item.id).await.unwrap();
        assert!(matches!(service.delete(item.id).await, Err(NavServiceError::NotFound(_))));
    }
}
