//! Id minting for rentals, cars and users.

use bech32::Bech32m;
use uuid7::uuid7;

// mint a uuid7 and render it under a human-readable prefix,
// e.g. "rental_", "car_", "user_"
pub fn new_id(hrp: &str) -> String {
    let hrp = bech32::Hrp::parse_unchecked(hrp);
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .expect("bech32 encoding of a 16-byte uuid payload cannot fail")
}
