// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helper for building event attributes.

use beacon_core::{hash, AttributeMap, AttributeValue};

/// A builder for constructing event attributes.
///
/// Values are scalars: strings, integers, floats and booleans. Sensitive
/// strings can be scrubbed at construction time with
/// [`insert_hashed`](Attributes::insert_hashed).
///
/// # Example
///
/// ```
/// use beacon::Attributes;
///
/// let attrs = Attributes::new()
///     .insert("screen", "checkout")
///     .insert("items", 3)
///     .insert("total", 99.99)
///     .insert("is_premium", true)
///     .insert_hashed("email", "jane@example.com");
///
/// assert!(attrs.get("email").unwrap().to_string().ends_with("##"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
	inner: AttributeMap,
}

impl Attributes {
	/// Creates a new empty Attributes builder.
	pub fn new() -> Self {
		Self {
			inner: AttributeMap::new(),
		}
	}

	/// Inserts a key-value pair.
	pub fn insert<K, V>(mut self, key: K, value: V) -> Self
	where
		K: Into<String>,
		V: Into<AttributeValue>,
	{
		self.inner.insert(key.into(), value.into());
		self
	}

	/// Inserts the [`hash`] of `value` instead of the value itself.
	pub fn insert_hashed<K>(mut self, key: K, value: &str) -> Self
	where
		K: Into<String>,
	{
		self.inner
			.insert(key.into(), AttributeValue::String(hash(value)));
		self
	}

	/// Merges another Attributes into this one.
	///
	/// If both contain the same key, the value from `other` takes precedence.
	pub fn merge(mut self, other: Attributes) -> Self {
		self.inner.extend(other.inner);
		self
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn get(&self, key: &str) -> Option<&AttributeValue> {
		self.inner.get(key)
	}

	pub fn values(&self) -> impl Iterator<Item = &AttributeValue> {
		self.inner.values()
	}

	pub fn into_map(self) -> AttributeMap {
		self.inner
	}
}

impl From<AttributeMap> for Attributes {
	fn from(map: AttributeMap) -> Self {
		Self { inner: map }
	}
}

impl From<Attributes> for AttributeMap {
	fn from(attrs: Attributes) -> Self {
		attrs.into_map()
	}
}
