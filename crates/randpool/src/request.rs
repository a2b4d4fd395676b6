//! Request templates for the random.org basic method family.
//!
//! A [`RequestTemplate`] is the immutable description of what a [`Fetcher`](crate::Fetcher)
//! should ask the service for. The number of values is never part of the template, it is
//! passed to every fetch separately so the cache can shrink a request without touching the
//! template.

use std::f64::consts::LOG2_10;

use serde_json::{Map, Value, json};

/// Bit cost of one UUID, as accounted by the service.
const UUID_BITS: u64 = 122;

/// The kind of random values to request.
#[derive(Clone, Debug, PartialEq)]
pub enum RandomMethod {
    /// Integers in `[min, max]`.
    Integers { min: i64, max: i64, replacement: bool },
    /// Sequences of `length` integers in `[min, max]`.
    IntegerSequences {
        length: usize,
        min: i64,
        max: i64,
        replacement: bool,
    },
    /// Decimal fractions in `[0, 1)` with the given number of decimal places.
    DecimalFractions { decimal_places: u32, replacement: bool },
    /// Values from a gaussian distribution.
    Gaussians {
        mean: f64,
        standard_deviation: f64,
        significant_digits: u32,
    },
    /// Strings of `length` characters drawn from `characters`.
    Strings {
        length: usize,
        characters: String,
        replacement: bool,
    },
    /// Version 4 UUIDs.
    Uuids,
    /// Blobs of `size` bits each.
    Blobs { size: u64, format: BlobFormat },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlobFormat {
    #[default]
    Base64,
    Hex,
}

impl BlobFormat {
    fn as_str(self) -> &'static str {
        match self {
            Self::Base64 => "base64",
            Self::Hex => "hex",
        }
    }
}

/// Number of bits needed to pick one of `choices` values.
fn bits_for_choices(choices: u64) -> u64 {
    if choices <= 1 {
        0
    } else {
        u64::from(u64::BITS - (choices - 1).leading_zeros())
    }
}

fn integer_range(min: i64, max: i64) -> u64 {
    (i128::from(max) - i128::from(min) + 1).clamp(0, i128::from(u64::MAX)) as u64
}

fn decimal_bits(digits: u32) -> u64 {
    (LOG2_10 * f64::from(digits)).ceil() as u64
}

/// Describes a request to the randomness service, without the value count.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestTemplate {
    /// What to generate.
    pub method: RandomMethod,
    /// Opaque data the service echoes back, passed through as is.
    pub user_data: Option<Value>,
}

impl RequestTemplate {
    pub fn new(method: RandomMethod) -> Self {
        Self {
            method,
            user_data: None,
        }
    }

    /// The JSON-RPC method name.
    pub fn method_name(&self) -> &'static str {
        match self.method {
            RandomMethod::Integers { .. } => "generateIntegers",
            RandomMethod::IntegerSequences { .. } => "generateIntegerSequences",
            RandomMethod::DecimalFractions { .. } => "generateDecimalFractions",
            RandomMethod::Gaussians { .. } => "generateGaussians",
            RandomMethod::Strings { .. } => "generateStrings",
            RandomMethod::Uuids => "generateUUIDs",
            RandomMethod::Blobs { .. } => "generateBlobs",
        }
    }

    /// Whether several batches may be fetched with a single request.
    ///
    /// Values drawn without replacement are unique within one request, so a bulk of them
    /// would be unique across batches too, which changes their distribution.
    pub fn allows_bulk(&self) -> bool {
        match self.method {
            RandomMethod::Integers { replacement, .. }
            | RandomMethod::IntegerSequences { replacement, .. }
            | RandomMethod::DecimalFractions { replacement, .. }
            | RandomMethod::Strings { replacement, .. } => replacement,
            RandomMethod::Gaussians { .. } | RandomMethod::Uuids | RandomMethod::Blobs { .. } => {
                true
            }
        }
    }

    /// The number of bits the service charges for one batch of `results_per_batch` values.
    pub fn bits_per_batch(&self, results_per_batch: usize) -> u64 {
        let n = results_per_batch as u64;
        match &self.method {
            RandomMethod::Integers { min, max, .. } => {
                n * bits_for_choices(integer_range(*min, *max))
            }
            RandomMethod::IntegerSequences {
                length, min, max, ..
            } => n * (*length as u64) * bits_for_choices(integer_range(*min, *max)),
            RandomMethod::DecimalFractions { decimal_places, .. } => {
                n * decimal_bits(*decimal_places)
            }
            RandomMethod::Gaussians {
                significant_digits, ..
            } => n * decimal_bits(*significant_digits),
            RandomMethod::Strings {
                length, characters, ..
            } => {
                let alphabet = characters.chars().count() as u64;
                n * (*length as u64) * bits_for_choices(alphabet)
            }
            RandomMethod::Uuids => n * UUID_BITS,
            RandomMethod::Blobs { size, .. } => n * size,
        }
    }

    /// Builds the JSON-RPC `params` object for a request of `count` values.
    pub fn to_params(&self, count: usize) -> Map<String, Value> {
        let params = match &self.method {
            RandomMethod::Integers {
                min,
                max,
                replacement,
            } => json!({ "n": count, "min": min, "max": max, "replacement": replacement }),
            RandomMethod::IntegerSequences {
                length,
                min,
                max,
                replacement,
            } => json!({
                "n": count,
                "length": length,
                "min": min,
                "max": max,
                "replacement": replacement,
            }),
            RandomMethod::DecimalFractions {
                decimal_places,
                replacement,
            } => json!({ "n": count, "decimalPlaces": decimal_places, "replacement": replacement }),
            RandomMethod::Gaussians {
                mean,
                standard_deviation,
                significant_digits,
            } => json!({
                "n": count,
                "mean": mean,
                "standardDeviation": standard_deviation,
                "significantDigits": significant_digits,
            }),
            RandomMethod::Strings {
                length,
                characters,
                replacement,
            } => json!({
                "n": count,
                "length": length,
                "characters": characters,
                "replacement": replacement,
            }),
            RandomMethod::Uuids => json!({ "n": count }),
            RandomMethod::Blobs { size, format } => {
                json!({ "n": count, "size": size, "format": format.as_str() })
            }
        };

        let Value::Object(mut params) = params else {
            unreachable!("request params are always an object");
        };
        if let Some(user_data) = &self.user_data {
            params.insert("userData".to_owned(), user_data.clone());
        }
        params
    }
}
