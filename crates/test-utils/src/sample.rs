//! Sample data sets.

use pid_openid::issuer::{Address, PidData};

/// A verified identity data set as the proofing service would report it.
#[must_use]
pub fn pid_data() -> PidData {
    PidData {
        given_name: "Erika".into(),
        family_name: "Mustermann".into(),
        birth_date: "1964-08-12".into(),
        birth_family_name: Some("Gabler".into()),
        place_of_birth: Some("Berlin".into()),
        nationality: Some("DE".into()),
        address: Some(Address {
            street_address: Some("Heidestraße 17".into()),
            locality: Some("Köln".into()),
            postal_code: Some("51147".into()),
            country: Some("DE".into()),
        }),
    }
}
