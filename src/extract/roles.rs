use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Rows scanned when looking for the header.
pub const HEADER_SCAN_ROWS: usize = 10;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Title,
    WholesalePrice,
    Color,
    Size,
    Stock,
    Image,
    Description,
    RetailReferencePrice,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Title,
        Role::WholesalePrice,
        Role::Color,
        Role::Size,
        Role::Stock,
        Role::Image,
        Role::Description,
        Role::RetailReferencePrice,
    ];
}

/// One role with its keyword groups. A header belongs to the role when it
/// contains any keyword; the index of the matching group ranks columns when
/// several of them carry the same role.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct RoleRule {
    pub role: Role,
    pub keywords: Vec<Vec<String>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleMatch {
    pub role: Role,
    pub priority: usize,
    pub group: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnRoles {
    columns: HashMap<Role, usize>,
    /// Price column was guessed from position, not from a header.
    pub positional_price: bool,
}

impl ColumnRoles {
    pub fn get(&self, role: Role) -> Option<usize> {
        self.columns.get(&role).copied()
    }

    pub fn cell<'a>(&self, role: Role, row: &'a [String]) -> Option<&'a str> {
        self.get(role)
            .and_then(|i| row.get(i))
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
    }
}

/// Ordered role rules; later rules take priority over earlier ones.
#[derive(Clone, Debug)]
pub struct RoleTable {
    rules: Vec<RoleRule>,
}

impl RoleTable {
    pub fn new(rules: &[RoleRule]) -> Self {
        let rules = rules
            .iter()
            .map(|r| RoleRule {
                role: r.role,
                keywords: r
                    .keywords
                    .iter()
                    .map(|g| g.iter().map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty()).collect())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, header: &str) -> Option<RoleMatch> {
        let header = header.trim().to_lowercase().replace('ё', "е");
        if header.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .enumerate()
            .rev()
            .find_map(|(priority, rule)| {
                rule.keywords
                    .iter()
                    .position(|group| group.iter().any(|k| header.contains(k.as_str())))
                    .map(|group| RoleMatch {
                        role: rule.role,
                        priority,
                        group,
                    })
            })
    }

    /// The row among the first few with the most role-bearing cells, when at
    /// least two cells carry a role.
    pub fn find_header(&self, rows: &[Vec<String>]) -> Option<usize> {
        rows.iter()
            .take(HEADER_SCAN_ROWS)
            .enumerate()
            .map(|(i, row)| (i, row.iter().filter(|c| self.classify(c).is_some()).count()))
            .filter(|(_, score)| *score >= 2)
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
            .map(|(i, _)| i)
    }

    pub fn resolve(&self, headers: &[String]) -> ColumnRoles {
        let mut best: HashMap<Role, (usize, usize)> = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            let Some(m) = self.classify(header) else {
                continue;
            };
            let candidate = (m.group, idx);
            best.entry(m.role)
                .and_modify(|cur| {
                    if candidate < *cur {
                        *cur = candidate;
                    }
                })
                .or_insert(candidate);
        }
        let mut columns: HashMap<Role, usize> = best.into_iter().map(|(r, (_, i))| (r, i)).collect();
        let taken = |columns: &HashMap<Role, usize>, i: usize| columns.values().any(|v| *v == i);
        if !columns.contains_key(&Role::Title) {
            if let Some(i) = (0..headers.len().max(1)).find(|i| !taken(&columns, *i)) {
                columns.insert(Role::Title, i);
            }
        }
        let mut positional_price = false;
        if !columns.contains_key(&Role::WholesalePrice) && !taken(&columns, 1) {
            columns.insert(Role::WholesalePrice, 1);
            positional_price = true;
        }
        ColumnRoles {
            columns,
            positional_price,
        }
    }

    /// Header cells naming each role once, used for grids built from
    /// unstructured posts.
    pub fn synthetic_header(&self) -> Vec<String> {
        Role::ALL
            .iter()
            .map(|role| {
                self.rules
                    .iter()
                    .find(|r| r.role == *role)
                    .and_then(|r| r.keywords.first())
                    .and_then(|g| g.first())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;

    fn table() -> RoleTable {
        RoleTable::new(&ImportConfig::default().roles)
    }

    fn headers(h: &[&str]) -> Vec<String> {
        h.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn later_roles_win() {
        let t = table();
        assert_eq!(Role::RetailReferencePrice, t.classify("Розничная цена").unwrap().role);
        assert_eq!(Role::Stock, t.classify("Размеры в наличии").unwrap().role);
        assert_eq!(Role::Image, t.classify("Фото товара").unwrap().role);
        assert_eq!(Role::WholesalePrice, t.classify("Цена").unwrap().role);
        assert_eq!(None, t.classify("№"));
    }

    #[test]
    fn prefers_dropship_over_price() {
        let roles = table().resolve(&headers(&["Модель", "Опт", "Цена", "Цена дроп", "Размер"]));
        assert_eq!(Some(0), roles.get(Role::Title));
        assert_eq!(Some(3), roles.get(Role::WholesalePrice));
        assert_eq!(Some(4), roles.get(Role::Size));
        assert!(!roles.positional_price);
    }

    #[test]
    fn guesses_price_position() {
        let roles = table().resolve(&headers(&["Модель", "???", "Фото"]));
        assert_eq!(Some(1), roles.get(Role::WholesalePrice));
        assert!(roles.positional_price);
    }

    #[test]
    fn finds_header_below_banner() {
        let rows = vec![
            headers(&["ПРАЙС ОБУВЬ 2024", "", ""]),
            headers(&["", "", ""]),
            headers(&["Название", "Цена", "Размеры"]),
            headers(&["Model X", "4900", "41-45"]),
        ];
        assert_eq!(Some(2), table().find_header(&rows));
        assert_eq!(None, table().find_header(&rows[3..]));
    }

    #[test]
    fn synthetic_header_roundtrips() {
        let t = table();
        let roles = t.resolve(&t.synthetic_header());
        for (i, role) in Role::ALL.iter().enumerate() {
            assert_eq!(Some(i), roles.get(*role), "{role:?}");
        }
    }
}
