// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-product stock counters.

use crate::base::{Money, ProductId};
use crate::error::PreconditionFailure;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
struct ProductData {
    id: ProductId,
    name: String,
    stock: u32,
    unit_price: Money,
}

impl ProductData {
    fn reserve(&mut self, quantity: u32) -> Result<(), PreconditionFailure> {
        self.stock = self
            .stock
            .checked_sub(quantity)
            .ok_or(PreconditionFailure::OutOfStock {
                product: self.id,
                available: self.stock,
                requested: quantity,
            })?;
        Ok(())
    }

    fn release(&mut self, quantity: u32) -> Result<(), PreconditionFailure> {
        self.stock = self
            .stock
            .checked_add(quantity)
            .ok_or(PreconditionFailure::StockOverflow(self.id))?;
        Ok(())
    }
}

#[derive(Debug)]
struct Product {
    inner: Mutex<ProductData>,
}

/// Point-in-time view of a product, as returned by [`InventoryStore::products`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSnapshot {
    pub id: ProductId,
    pub name: String,
    pub stock: u32,
    pub unit_price: Money,
}

impl Serialize for ProductSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Product", 4)?;
        state.serialize_field("product", &self.id)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("stock", &self.stock)?;
        state.serialize_field("price", &self.unit_price.to_major())?;
        state.end()
    }
}

/// Holds product stock and current unit prices.
#[derive(Debug, Default)]
pub struct InventoryStore {
    products: DashMap<ProductId, Product>,
}

impl InventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`PreconditionFailure::DuplicateProduct`] if the id is taken.
    pub fn add_product(
        &self,
        id: ProductId,
        name: impl Into<String>,
        stock: u32,
        unit_price: Money,
    ) -> Result<(), PreconditionFailure> {
        match self.products.entry(id) {
            Entry::Occupied(_) => Err(PreconditionFailure::DuplicateProduct(id)),
            Entry::Vacant(entry) => {
                entry.insert(Product {
                    inner: Mutex::new(ProductData {
                        id,
                        name: name.into(),
                        stock,
                        unit_price,
                    }),
                });
                Ok(())
            }
        }
    }

    /// Delists a product, returning its remaining stock.
    ///
    /// Administrative: this bypasses transaction ownership entirely.
    pub fn remove_product(&self, id: ProductId) -> Option<u32> {
        self.products
            .remove(&id)
            .map(|(_, product)| product.inner.into_inner().stock)
    }

    pub fn contains(&self, id: ProductId) -> bool {
        self.products.contains_key(&id)
    }

    pub fn get_stock(&self, id: ProductId) -> Result<u32, PreconditionFailure> {
        self.with_product(id, |data| Ok(data.stock))
    }

    pub fn unit_price(&self, id: ProductId) -> Result<Money, PreconditionFailure> {
        self.with_product(id, |data| Ok(data.unit_price))
    }

    /// Changes the current price. Orders already placed keep their snapshot.
    pub fn set_unit_price(&self, id: ProductId, price: Money) -> Result<(), PreconditionFailure> {
        self.with_product(id, |data| {
            data.unit_price = price;
            Ok(())
        })
    }

    /// Decrements stock if at least `quantity` units are available.
    ///
    /// # Errors
    ///
    /// - [`PreconditionFailure::UnknownProduct`]
    /// - [`PreconditionFailure::OutOfStock`] - stock left untouched.
    pub fn try_reserve(&self, id: ProductId, quantity: u32) -> Result<(), PreconditionFailure> {
        self.with_product(id, |data| data.reserve(quantity))
    }

    /// Returns units to stock.
    ///
    /// # Errors
    ///
    /// - [`PreconditionFailure::UnknownProduct`]
    /// - [`PreconditionFailure::StockOverflow`] if the counter would wrap.
    pub fn release(&self, id: ProductId, quantity: u32) -> Result<(), PreconditionFailure> {
        self.with_product(id, |data| data.release(quantity))
    }

    /// All products, sorted by id.
    pub fn products(&self) -> Vec<ProductSnapshot> {
        let mut snapshots: Vec<ProductSnapshot> = self
            .products
            .iter()
            .map(|entry| {
                let data = entry.inner.lock();
                ProductSnapshot {
                    id: data.id,
                    name: data.name.clone(),
                    stock: data.stock,
                    unit_price: data.unit_price,
                }
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn with_product<T>(
        &self,
        id: ProductId,
        f: impl FnOnce(&mut ProductData) -> Result<T, PreconditionFailure>,
    ) -> Result<T, PreconditionFailure> {
        let product = self
            .products
            .get(&id)
            .ok_or(PreconditionFailure::UnknownProduct(id))?;
        let mut data = product.inner.lock();
        f(&mut data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(stock: u32) -> ProductData {
        ProductData {
            id: ProductId(3),
            name: "widget".to_string(),
            stock,
            unit_price: Money(100),
        }
    }

    #[test]
    fn product_data_reserve_all_stock() {
        let mut data = data(5);
        data.reserve(5).unwrap();
        assert_eq!(data.stock, 0);
    }

    #[test]
    fn product_data_reserve_beyond_stock_leaves_stock() {
        let mut data = data(2);
        assert_eq!(
            data.reserve(3),
            Err(PreconditionFailure::OutOfStock {
                product: ProductId(3),
                available: 2,
                requested: 3,
            })
        );
        assert_eq!(data.stock, 2);
    }

    #[test]
    fn product_data_release_overflow() {
        let mut data = data(u32::MAX);
        assert_eq!(
            data.release(1),
            Err(PreconditionFailure::StockOverflow(ProductId(3)))
        );
    }

    #[test]
    fn repricing_changes_current_price_only() {
        let inventory = InventoryStore::new();
        inventory
            .add_product(ProductId(1), "widget", 4, Money(250))
            .unwrap();
        inventory.set_unit_price(ProductId(1), Money(300)).unwrap();
        assert_eq!(inventory.unit_price(ProductId(1)), Ok(Money(300)));
        assert_eq!(inventory.get_stock(ProductId(1)), Ok(4));
    }

    #[test]
    fn snapshot_serializes_price_in_major_units() {
        let snapshot = ProductSnapshot {
            id: ProductId(7),
            name: "gadget".to_string(),
            stock: 12,
            unit_price: Money(250),
        };
        let parsed = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(parsed["product"], 7);
        assert_eq!(parsed["stock"], 12);
        assert_eq!(parsed["price"].as_str().unwrap(), "2.50");
    }
}
