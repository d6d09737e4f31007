//! XML list shapes shared by response structs
//!
//! EC2 wraps list entries in `<item>`, the Query services in `<member>`.

use serde::{Deserialize, Serialize};

macro_rules! xml_list {
    ($(#[$doc:meta])* $name:ident, $element:literal) => {
        $(#[$doc])*
        #[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
        pub struct $name<T> {
            #[serde(rename = $element, default = "Vec::new")]
            pub items: Vec<T>,
        }

        impl<T> Default for $name<T> {
            fn default() -> Self {
                Self { items: Vec::new() }
            }
        }

        impl<T> $name<T> {
            pub fn len(&self) -> usize {
                self.items.len()
            }

            pub fn is_empty(&self) -> bool {
                self.items.is_empty()
            }

            pub fn iter(&self) -> std::slice::Iter<'_, T> {
                self.items.iter()
            }

            pub fn into_vec(self) -> Vec<T> {
                self.items
            }
        }

        impl<T> IntoIterator for $name<T> {
            type Item = T;
            type IntoIter = std::vec::IntoIter<T>;

            fn into_iter(self) -> Self::IntoIter {
                self.items.into_iter()
            }
        }
    };
}

xml_list!(
    /// `<xSet><item>…</item></xSet>`
    ItemSet,
    "item"
);

xml_list!(
    /// `<Xs><member>…</member></Xs>`
    MemberList,
    "member"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, Debug)]
    struct Doc {
        #[serde(rename = "groupSet", default)]
        groups: ItemSet<String>,
        #[serde(rename = "Users", default)]
        users: MemberList<String>,
    }

    #[test]
    fn test_item_and_member_lists() {
        let xml = "<Doc><groupSet><item>a</item><item>b</item></groupSet>\
                   <Users><member>alice</member></Users></Doc>";
        let doc: Doc = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(doc.groups.into_vec(), vec!["a", "b"]);
        assert_eq!(doc.users.len(), 1);
    }

    #[test]
    fn test_missing_and_empty_lists() {
        let doc: Doc = quick_xml::de::from_str("<Doc><groupSet/></Doc>").unwrap();
        assert!(doc.groups.is_empty());
        assert!(doc.users.is_empty());
    }
}
