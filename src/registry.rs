use crate::update_log::SheetId;
use serde::{Deserialize, Serialize};

/// Sheets whose name ends with this suffix are private to their owner.
pub const PRIVATE_SUFFIX: &str = "-private";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(PRIVATE_SUFFIX) {
            Visibility::Private
        } else {
            Visibility::Public
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub id: SheetId,
    pub name: String,
    pub owner: String,
    pub visibility: Visibility,
}

impl Sheet {
    pub fn is_owned_by(&self, client: &str) -> bool {
        self.owner == client
    }

    /// Public sheets are visible to everyone, private ones only to the owner.
    pub fn is_visible_to(&self, client: &str) -> bool {
        self.visibility == Visibility::Public || self.is_owned_by(client)
    }

    pub fn sheet_ref(&self) -> SheetRef {
        SheetRef::new(&self.owner, &self.name)
    }
}

/// A sheet as named by callers: owner plus sheet name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SheetRef {
    pub publisher: String,
    pub sheet: String,
}

impl SheetRef {
    pub fn new(publisher: impl Into<String>, sheet: impl Into<String>) -> Self {
        SheetRef {
            publisher: publisher.into(),
            sheet: sheet.into(),
        }
    }
}

/// `requested` if unused, otherwise `requested (n)` with the smallest free n.
pub fn unique_sheet_name<'a, I>(existing: I, requested: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let existing: Vec<&str> = existing.into_iter().collect();
    if !existing.contains(&requested) {
        return requested.to_string();
    }

    (1..)
        .map(|n| format!("{} ({})", requested, n))
        .find(|candidate| !existing.contains(&candidate.as_str()))
        .unwrap_or_else(|| requested.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_follows_name() {
        assert_eq!(Visibility::from_name("budget"), Visibility::Public);
        assert_eq!(Visibility::from_name("budget-private"), Visibility::Private);
    }

    #[test]
    fn private_sheets_visible_to_owner_only() {
        let sheet = Sheet {
            id: 1,
            name: "notes-private".into(),
            owner: "ana".into(),
            visibility: Visibility::Private,
        };
        assert!(sheet.is_visible_to("ana"));
        assert!(!sheet.is_visible_to("bob"));
    }

    #[test]
    fn collisions_take_smallest_free_suffix() {
        assert_eq!(unique_sheet_name(["a", "b"], "c"), "c");
        assert_eq!(unique_sheet_name(["c"], "c"), "c (1)");
        assert_eq!(unique_sheet_name(["c", "c (1)", "c (3)"], "c"), "c (2)");
    }
}
