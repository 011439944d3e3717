//! Catalog items and listing options.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Categories the catalog is organized by.
pub const CATALOG_CATEGORIES: [&str; 6] =
    ["Books", "Electronics", "Clothing", "Home", "Toys", "Sports"];

/// A catalog item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Item identifier
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Long description
    pub description: Option<String>,
    /// One of [`CATALOG_CATEGORIES`]
    pub category: Option<String>,
    /// List price in dollars
    pub usd_price: Option<f64>,
    /// Price in points
    pub points_price: i32,
    /// Average rating
    pub rating: Option<f32>,
    /// Stock keeping unit
    pub sku: Option<String>,
    /// Shipping weight
    pub weight: Option<f32>,
    /// Package width
    pub width: Option<f32>,
    /// Package height
    pub height: Option<f32>,
    /// Package depth
    pub depth: Option<f32>,
}

/// Sortable catalog columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CatalogSort {
    #[default]
    Name,
    UsdPrice,
    PointsPrice,
    Rating,
}

impl CatalogSort {
    /// Parse a caller-supplied column name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "name" => Some(Self::Name),
            "usd_price" => Some(Self::UsdPrice),
            "points_price" => Some(Self::PointsPrice),
            "rating" => Some(Self::Rating),
            _ => None,
        }
    }

    /// Column name used in `ORDER BY`.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::UsdPrice => "usd_price",
            Self::PointsPrice => "points_price",
            Self::Rating => "rating",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Parse a caller-supplied direction, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }

    /// SQL keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Filter and ordering of a catalog listing.
///
/// Sort values outside the allowed set fall back to the defaults (name,
/// ascending). Only the column and direction reach the SQL text, and both
/// come from fixed strings; the category is always a bound parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Only items in this category
    pub category: Option<String>,
    /// Sort column
    pub sort: CatalogSort,
    /// Sort direction
    pub order: SortOrder,
}

impl CatalogQuery {
    /// Build a query from raw caller input.
    pub fn new(category: Option<&str>, sort_by: Option<&str>, sort_order: Option<&str>) -> Self {
        Self {
            category: category.map(str::to_string),
            sort: sort_by.and_then(CatalogSort::parse).unwrap_or_default(),
            order: sort_order.and_then(SortOrder::parse).unwrap_or_default(),
        }
    }

    /// Whether the category filter names a category that doesn't exist, so
    /// the listing is empty without asking the store.
    pub fn matches_nothing(&self) -> bool {
        self.category.as_deref().is_some_and(|category| !CATALOG_CATEGORIES.contains(&category))
    }

    /// Whether `item` passes the category filter.
    pub fn includes(&self, item: &CatalogItem) -> bool {
        match &self.category {
            Some(category) => item.category.as_ref() == Some(category),
            None => true,
        }
    }

    /// Listing order of two items.
    pub fn compare(&self, a: &CatalogItem, b: &CatalogItem) -> Ordering {
        let ordering = match self.sort {
            CatalogSort::Name => a.name.cmp(&b.name),
            CatalogSort::UsdPrice => {
                a.usd_price.partial_cmp(&b.usd_price).unwrap_or(Ordering::Equal)
            }
            CatalogSort::PointsPrice => a.points_price.cmp(&b.points_price),
            CatalogSort::Rating => a.rating.partial_cmp(&b.rating).unwrap_or(Ordering::Equal),
        };
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, points_price: i32, rating: f32) -> CatalogItem {
        CatalogItem {
            id: Uuid::new_v4(),
            name: name.to_string(),
            points_price,
            rating: Some(rating),
            category: Some("Books".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_unknown_sort_falls_back_to_name_ascending() {
        let query = CatalogQuery::new(None, Some("name; drop table x"), Some("sideways"));
        assert_eq!(query.sort, CatalogSort::Name);
        assert_eq!(query.order, SortOrder::Asc);

        let query = CatalogQuery::new(None, Some("POINTS_PRICE"), Some("DESC"));
        assert_eq!(query.sort.column(), "points_price");
        assert_eq!(query.order.keyword(), "desc");
    }

    #[test]
    fn test_unknown_category_matches_nothing() {
        assert!(CatalogQuery::new(Some("Garden"), None, None).matches_nothing());
        assert!(!CatalogQuery::new(Some("Books"), None, None).matches_nothing());
        assert!(!CatalogQuery::default().matches_nothing());
    }

    #[test]
    fn test_compare_honors_column_and_direction() {
        let cheap = item("Zine", 10, 4.5);
        let pricey = item("Atlas", 90, 3.0);

        let by_price = CatalogQuery::new(None, Some("points_price"), Some("desc"));
        assert_eq!(by_price.compare(&pricey, &cheap), Ordering::Less);

        let by_name = CatalogQuery::default();
        assert_eq!(by_name.compare(&pricey, &cheap), Ordering::Less);

        let by_rating = CatalogQuery::new(None, Some("rating"), None);
        assert_eq!(by_rating.compare(&cheap, &pricey), Ordering::Greater);
    }
}
