//! Allow-list of obsolete method signatures removed on sight.

use std::sync::Arc;

/// Method names under superseded conventions.
///
/// An entry is either `method`, matching that method on any type, or
/// `Type.method`, where `Type` is the short or qualified owner name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacySignatures {
	entries: Vec<(Option<Arc<str>>, Arc<str>)>,
}

impl LegacySignatures {
	pub fn new<S: AsRef<str>>(entries: &[S]) -> Self {
		let entries = entries
			.iter()
			.map(|entry| match entry.as_ref().rsplit_once('.') {
				Some((owner, method)) => (Some(Arc::from(owner)), Arc::from(method)),
				None => (None, Arc::from(entry.as_ref())),
			})
			.collect();
		Self { entries }
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// True if `method` on the type `owner` is on the list.
	pub fn matches(&self, owner: &str, method: &str) -> bool {
		let short = owner.rsplit('.').next().unwrap_or(owner);
		self.entries.iter().any(|(entry_owner, entry_method)| {
			**entry_method == *method
				&& entry_owner
					.as_deref()
					.is_none_or(|entry_owner| entry_owner == owner || entry_owner == short)
		})
	}

	/// First word of `message` naming a listed method of `owner`.
	pub fn find_in<'m>(&self, owner: &str, message: &'m str) -> Option<&'m str> {
		message
			.split(|c: char| !(c.is_alphanumeric() || c == '_'))
			.find(|word| !word.is_empty() && self.matches(owner, word))
	}
}
