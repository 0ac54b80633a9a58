//! Addresses and regions.
//!
//! Only what the order workflow needs: an order's breakdown location is created
//! together with the order, and a master's region is read through their address.

use crate::{
    entities::{Address, Region, address, region},
    errors::{Error, Result},
};
use sea_orm::{QueryOrder, Set, prelude::*};

/// Fields of an address as submitted by a client
#[derive(Debug, Clone, PartialEq)]
pub struct NewAddress {
    /// Region the address lies in
    pub region_id: i64,
    /// City name
    pub city: Option<String>,
    /// Street and house
    pub street: Option<String>,
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
}

impl NewAddress {
    /// An address known only by its region.
    #[must_use]
    pub const fn in_region(region_id: i64) -> Self {
        Self {
            region_id,
            city: None,
            street: None,
            latitude: None,
            longitude: None,
        }
    }
}

/// Creates a region.
pub async fn create_region<C>(db: &C, name: &str) -> Result<region::Model>
where
    C: ConnectionTrait,
{
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::invalid_state("Region name cannot be empty"));
    }
    region::ActiveModel {
        name: Set(name.to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// All regions, alphabetically.
pub async fn list_regions<C>(db: &C) -> Result<Vec<region::Model>>
where
    C: ConnectionTrait,
{
    Region::find()
        .order_by_asc(region::Column::Name)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Creates an address after checking that its region exists.
pub async fn create<C>(db: &C, new_address: NewAddress) -> Result<address::Model>
where
    C: ConnectionTrait,
{
    Region::find_by_id(new_address.region_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Region", new_address.region_id))?;

    address::ActiveModel {
        region_id: Set(new_address.region_id),
        city: Set(new_address.city),
        street: Set(new_address.street),
        latitude: Set(new_address.latitude),
        longitude: Set(new_address.longitude),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(Into::into)
}

/// Fetches an address by id.
pub async fn get_by_id<C>(db: &C, address_id: i64) -> Result<address::Model>
where
    C: ConnectionTrait,
{
    Address::find_by_id(address_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Address", address_id))
}

/// Replaces every field of an existing address.
pub async fn update<C>(db: &C, address_id: i64, changes: NewAddress) -> Result<address::Model>
where
    C: ConnectionTrait,
{
    let current = get_by_id(db, address_id).await?;
    Region::find_by_id(changes.region_id)
        .one(db)
        .await?
        .ok_or_else(|| Error::not_found("Region", changes.region_id))?;

    let mut model: address::ActiveModel = current.into();
    model.region_id = Set(changes.region_id);
    model.city = Set(changes.city);
    model.street = Set(changes.street);
    model.latitude = Set(changes.latitude);
    model.longitude = Set(changes.longitude);
    model.update(db).await.map_err(Into::into)
}
