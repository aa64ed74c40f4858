use serde::{Deserialize, Serialize};

use storefront_core::{AddressId, DomainError, DomainResult, Entity, UserId};

/// Shipping address, owned by one user. Read-only for the order engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    id: AddressId,
    user_id: UserId,
    recipient: String,
    line1: String,
    city: String,
    country_code: String,
}

impl ShippingAddress {
    pub fn new(
        id: AddressId,
        user_id: UserId,
        recipient: impl Into<String>,
        line1: impl Into<String>,
        city: impl Into<String>,
        country_code: impl Into<String>,
    ) -> DomainResult<Self> {
        let recipient = recipient.into().trim().to_string();
        let line1 = line1.into().trim().to_string();
        let city = city.into().trim().to_string();
        let country_code = country_code.into().trim().to_ascii_uppercase();

        if recipient.is_empty() || line1.is_empty() || city.is_empty() {
            return Err(DomainError::validation(
                "address recipient, line1 and city are required",
            ));
        }
        if country_code.len() != 2 || !country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "country_code must be a two-letter ISO code",
            ));
        }

        Ok(Self {
            id,
            user_id,
            recipient,
            line1,
            city,
            country_code,
        })
    }

    pub fn id_typed(&self) -> AddressId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn line1(&self) -> &str {
        &self.line1
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    pub fn belongs_to(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }
}

impl Entity for ShippingAddress {
    type Id = AddressId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
