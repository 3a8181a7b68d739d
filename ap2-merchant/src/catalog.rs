//! Read-only product catalog provider.
//!
//! The catalog is reference data: loaded once at service construction, read
//! many times, never mutated by requests. Reservation accounting happens in
//! [`crate::inventory`], not here — a catalog lookup always reports the
//! listed price and the stock the merchant loaded, and absence is "not
//! found", never zero.

use ap2::product::Product;
use ap2::timestamp::{SECS_PER_DAY, UnixTimestamp};
use std::collections::HashMap;

/// Read-only lookup into a merchant's product listings.
pub trait ProductCatalog: Send + Sync {
    /// Looks up a product by id. Absence means "not found", never zero stock.
    fn product(&self, id: &str) -> Option<Product>;

    /// All listed products.
    fn all(&self) -> Vec<Product>;

    /// Case-insensitive search over name and description, optionally
    /// restricted to a category.
    fn search(&self, query: &str, category: Option<&str>, max_results: usize) -> Vec<Product> {
        let query = query.to_lowercase();
        self.all()
            .into_iter()
            .filter(|p| {
                category.is_none_or(|c| p.category.eq_ignore_ascii_case(c))
                    && (query.is_empty()
                        || p.name.to_lowercase().contains(&query)
                        || p.description.to_lowercase().contains(&query))
            })
            .take(max_results)
            .collect()
    }

    /// Number of listed products.
    fn len(&self) -> usize {
        self.all().len()
    }

    /// Whether the catalog lists nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An in-memory catalog built once from a product list.
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    products: HashMap<String, Product>,
    order: Vec<String>,
}

impl InMemoryCatalog {
    /// Builds a catalog from a product list, preserving listing order.
    #[must_use]
    pub fn new(products: Vec<Product>) -> Self {
        let order = products.iter().map(|p| p.id.clone()).collect();
        let products = products.into_iter().map(|p| (p.id.clone(), p)).collect();
        Self { products, order }
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn product(&self, id: &str) -> Option<Product> {
        self.products.get(id).cloned()
    }

    fn all(&self) -> Vec<Product> {
        self.order
            .iter()
            .filter_map(|id| self.products.get(id).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.products.len()
    }
}

/// The demo electronics catalog used by the reference deployment and tests.
#[must_use]
pub fn demo_catalog() -> InMemoryCatalog {
    let expires = UnixTimestamp::now() + SECS_PER_DAY;
    let listing = |id: &str, name: &str, price: &str, description: &str, stock, merchant: &str, refund_period| Product {
        id: id.into(),
        name: name.into(),
        price: price.parse().unwrap_or_default(),
        category: "electronics".into(),
        description: description.into(),
        stock,
        merchant: merchant.into(),
        expires,
        refund_period,
    };
    InMemoryCatalog::new(vec![
        listing(
            "laptop_001",
            "High-performance laptop",
            "1599.99",
            "Latest generation processor, 32GB RAM, 1TB SSD",
            15,
            "Tech Store",
            30,
        ),
        listing(
            "laptop_002",
            "Mid-range business laptop",
            "1129.50",
            "Perfect for business and productivity tasks",
            25,
            "Tech Store",
            30,
        ),
        listing(
            "laptop_003",
            "Entry-level student laptop",
            "789.00",
            "Affordable option for students and basic tasks",
            40,
            "Generic Merchant",
            14,
        ),
        listing(
            "phone_001",
            "Flagship smartphone",
            "999.99",
            "Latest smartphone with advanced camera",
            30,
            "Tech Store",
            30,
        ),
        listing(
            "tablet_001",
            "Professional tablet",
            "649.99",
            "High-resolution display, stylus included",
            20,
            "Tech Store",
            30,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_id() {
        let catalog = demo_catalog();
        let laptop = catalog.product("laptop_002").unwrap();
        assert_eq!(laptop.price.to_string(), "1129.50");
        assert_eq!(laptop.stock, 25);
    }

    #[test]
    fn test_absence_is_not_found() {
        let catalog = demo_catalog();
        assert!(catalog.product("laptop_999").is_none());
    }

    #[test]
    fn test_search_matches_name_and_description() {
        let catalog = demo_catalog();
        let laptops = catalog.search("laptop", None, 10);
        assert_eq!(laptops.len(), 3);
        let students = catalog.search("students", None, 10);
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id, "laptop_003");
    }

    #[test]
    fn test_search_respects_max_results() {
        let catalog = demo_catalog();
        assert_eq!(catalog.search("laptop", None, 2).len(), 2);
    }

    #[test]
    fn test_search_category_filter() {
        let catalog = demo_catalog();
        assert_eq!(catalog.search("", Some("electronics"), 10).len(), 5);
        assert!(catalog.search("", Some("groceries"), 10).is_empty());
    }
}
