//! Navigation item repository

use super::{DbRow, InsertId};
use crate::db::DynDatabasePool;
use crate::models::{NavItem, NavItemTree, NavOrderItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

const NAV_COLUMNS: &str = "id, parent_id, title, url, open_new_tab, sort_order, visible";

#[async_trait]
pub trait NavItemRepository: Send + Sync {
    async fn create(&self, item: &NavItem) -> Result<NavItem>;
    async fn get_by_id(&self, id: i64) -> Result<Option<NavItem>>;
    /// All items ordered by `sort_order`, hidden ones included
    async fn list(&self) -> Result<Vec<NavItem>>;
    async fn list_visible(&self) -> Result<Vec<NavItem>>;
    async fn update(&self, item: &NavItem) -> Result<()>;
    /// Apply a batch of position changes atomically
    async fn reorder(&self, items: &[NavOrderItem]) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<bool>;
}

pub struct SqlxNavItemRepository {
    pool: DynDatabasePool,
}

impl SqlxNavItemRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NavItemRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl NavItemRepository for SqlxNavItemRepository {
    async fn create(&self, item: &NavItem) -> Result<NavItem> {
        let id = with_pool!(self.pool, |p| {
            sqlx::query(
                "INSERT INTO nav_items (parent_id, title, url, open_new_tab, sort_order, visible) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(item.parent_id)
            .bind(&item.title)
            .bind(&item.url)
            .bind(item.open_new_tab)
            .bind(item.sort_order)
            .bind(item.visible)
            .execute(p)
            .await
            .context("Failed to create nav item")?
            .insert_id()
        });
        Ok(NavItem {
            id,
            ..item.clone()
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<NavItem>> {
        let sql = format!("SELECT {} FROM nav_items WHERE id = ?", NAV_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(id)
                .fetch_optional(p)
                .await
                .context("Failed to get nav item")?
                .map(|row| row_to_nav_item(&row))
                .transpose()
        })
    }

    async fn list(&self) -> Result<Vec<NavItem>> {
        let sql = format!("SELECT {} FROM nav_items ORDER BY sort_order, id", NAV_COLUMNS);
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .fetch_all(p)
                .await
                .context("Failed to list nav items")?
                .iter()
                .map(row_to_nav_item)
                .collect()
        })
    }

    async fn list_visible(&self) -> Result<Vec<NavItem>> {
        let sql = format!(
            "SELECT {} FROM nav_items WHERE visible = ? ORDER BY sort_order, id",
            NAV_COLUMNS
        );
        with_pool!(self.pool, |p| {
            sqlx::query(&sql)
                .bind(true)
                .fetch_all(p)
                .await
                .context("Failed to list visible nav items")?
                .iter()
                .map(row_to_nav_item)
                .collect()
        })
    }

    async fn update(&self, item: &NavItem) -> Result<()> {
        with_pool!(self.pool, |p| {
            sqlx::query(
                "UPDATE nav_items SET parent_id = ?, title = ?, url = ?, open_new_tab = ?, \
                 sort_order = ?, visible = ? WHERE id = ?",
            )
            .bind(item.parent_id)
            .bind(&item.title)
            .bind(&item.url)
            .bind(item.open_new_tab)
            .bind(item.sort_order)
            .bind(item.visible)
            .bind(item.id)
            .execute(p)
            .await
            .context("Failed to update nav item")?;
        });
        Ok(())
    }

    async fn reorder(&self, items: &[NavOrderItem]) -> Result<()> {
        with_pool!(self.pool, |p| {
            let mut tx = p.begin().await.context("Failed to begin transaction")?;
            for item in items {
                sqlx::query("UPDATE nav_items SET parent_id = ?, sort_order = ? WHERE id = ?")
                    .bind(item.parent_id)
                    .bind(item.sort_order)
                    .bind(item.id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to reorder nav item")?;
            }
            tx.commit().await.context("Failed to commit nav order")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(with_pool!(self.pool, |p| {
            sqlx::query("DELETE FROM nav_items WHERE id = ?")
                .bind(id)
                .execute(p)
                .await
                .context("Failed to delete nav item")?
                .rows_affected()
                > 0
        }))
    }
}

/// Assemble a flat, sorted list into a tree. Items whose parent is missing
/// from the list are dropped along with their descendants.
pub fn build_nav_tree(items: Vec<NavItem>) -> Vec<NavItemTree> {
    let mut children_map: HashMap<Option<i64>, Vec<NavItem>> = HashMap::new();
    for item in items {
        children_map.entry(item.parent_id).or_default().push(item);
    }
    for children in children_map.values_mut() {
        children.sort_by_key(|item| (item.sort_order, item.id));
    }

    fn build_subtree(
        parent_id: Option<i64>,
        children_map: &mut HashMap<Option<i64>, Vec<NavItem>>,
    ) -> Vec<NavItemTree> {
        let Some(children) = children_map.remove(&parent_id) else {
            return Vec::new();
        };
        children
            .into_iter()
            .map(|item| {
                let children = build_subtree(Some(item.id), children_map);
                NavItemTree {
                    item,
                    children,
                }
            })
            .collect()
    }

    build_subtree(None, &mut children_map)
}

fn row_to_nav_item(row: &impl DbRow) -> Result<NavItem> {
    Ok(NavItem {
        id: row.get_i64("id")?,
        parent_id: row.get_opt_i64("parent_id")?,
        title: row.get_string("title")?,
        url: row.get_string("url")?,
        open_new_tab: row.get_bool("open_new_tab")?,
        sort_order: row.get_i32("sort_order")?,
        visible: row.get_bool("visible")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::test_support::migrated_pool;

    fn item(id: i64, parent_id: Option<i64>, sort_order: i32) -> NavItem {
        NavItem {
            id,
            parent_id,
            sort_order,
            ..NavItem::new(format!("Item {}", id), "/".to_string())
        }
    }

    #[test]
    fn test_build_nav_tree_nests_and_sorts() {
        let tree = build_nav_tree(vec![
            item(1, None, 2),
            item(2, None, 1),
            item(3, Some(1), 1),
            item(4, Some(1), 0),
            item(5, Some(99), 0),
        ]);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].item.id, 2);
        assert_eq!(tree[1].item.id, 1);
        let child_ids: Vec<_> = tree[1].children.iter().map(|c| c.item.id).collect();
        assert_eq!(child_ids, vec![4, 3]);
    }

    #[tokio::test]
    async fn test_seeded_items() {
        let repo = SqlxNavItemRepository::new(migrated_pool().await);
        let items = repo.list().await.unwrap();
        let urls: Vec<_> = items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["/", "/memos"]);
    }

    #[tokio::test]
    async fn test_crud_and_reorder() {
        let repo = SqlxNavItemRepository::new(migrated_pool().await);
        let parent = repo
            .create(&NavItem::new("Docs".to_string(), "/docs".to_string()))
            .await
            .unwrap();
        let mut child = repo
            .create(&NavItem {
                parent_id: Some(parent.id),
                ..NavItem::new("API".to_string(), "/docs/api".to_string())
            })
            .await
            .unwrap();

        child.visible = false;
        repo.update(&child).await.unwrap();
        assert_eq!(repo.list_visible().await.unwrap().len(), 3);

        repo.reorder(&[NavOrderItem {
            id: child.id,
            parent_id: None,
            sort_order: 9,
        }])
        .await
        .unwrap();
        let moved = repo.get_by_id(child.id).await.unwrap().unwrap();
        assert_eq!(moved.parent_id, None);
        assert_eq!(moved.sort_order, 9);

        assert!(repo.delete(parent.id).await.unwrap());
        assert!(!repo.delete(parent.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleting_parent_cascades() {
        let repo = SqlxNavItemRepository::new(migrated_pool().await);
        let parent = repo
            .create(&NavItem::new("P".to_string(), "/p".to_string()))
            .await
            .unwrap();
        let child = repo
            .create(&NavItem {
                parent_id: Some(parent.id),
                ..NavItem::new("C".to_string(), "/c".to_string())
            })
            .await
            .unwrap();

        repo.delete(parent.id).await.unwrap();
        assert!(repo.get_by_id(child.id).await.unwrap().is_none());
    }
}
