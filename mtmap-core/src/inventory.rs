use crate::binary::{ByteReader, CodecError, latin1_decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const INVENTORY_END: &str = "EndInventory";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("unexpected item on line {line}")]
    UnexpectedItem { line: usize },
    #[error("too few items for list {list}")]
    TooFewItems { list: String },
    #[error("item outside of any list on line {line}")]
    ItemOutsideList { line: usize },
    #[error("malformed inventory line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub name: String,
    pub count: u32,
    /// Wear and item metadata words following the count, kept verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub extra: String,
}

impl ItemStack {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_fields(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
            extra: String::new(),
        }
    }

    /// Parses `<name> [<count> [<extra>...]]`; an empty string is the empty stack.
    pub fn from_serialized_text(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::empty());
        }

        let mut parts = text.splitn(3, ' ');
        let name = parts.next().unwrap_or_default().to_string();
        let count = match parts.next() {
            Some(count) => count
                .parse::<u32>()
                .map_err(|err| format!("invalid count {count:?}: {err}"))?,
            None => 1,
        };
        let extra = parts.next().unwrap_or_default().to_string();

        Ok(Self { name, count, extra })
    }

    pub fn to_serialized_text(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        if self.extra.is_empty() {
            format!("{} {}", self.name, self.count)
        } else {
            format!("{} {} {}", self.name, self.count, self.extra)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() || self.count == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryList {
    pub name: String,
    pub slots: Vec<ItemStack>,
}

impl InventoryList {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            slots: vec![ItemStack::empty(); size],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvRef {
    lists: Vec<InventoryList>,
}

impl InvRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn lists(&self) -> &[InventoryList] {
        &self.lists
    }

    pub fn list_names(&self) -> impl Iterator<Item = &str> {
        self.lists.iter().map(|list| list.name.as_str())
    }

    pub fn get_list(&self, name: &str) -> Option<&[ItemStack]> {
        self.lists
            .iter()
            .find(|list| list.name == name)
            .map(|list| list.slots.as_slice())
    }

    /// Replaces the list called `name`, or appends it when absent.
    pub fn set_list(&mut self, name: &str, slots: Vec<ItemStack>) {
        match self.lists.iter_mut().find(|list| list.name == name) {
            Some(list) => list.slots = slots,
            None => self.lists.push(InventoryList {
                name: name.to_string(),
                slots,
            }),
        }
    }

    pub fn remove_list(&mut self, name: &str) -> Option<Vec<ItemStack>> {
        let index = self.lists.iter().position(|list| list.name == name)?;
        Some(self.lists.remove(index).slots)
    }

    pub fn get_size(&self, name: &str) -> usize {
        self.get_list(name).map_or(0, <[ItemStack]>::len)
    }

    pub fn set_size(&mut self, name: &str, size: usize) {
        match self.lists.iter_mut().find(|list| list.name == name) {
            Some(list) => list.slots.resize(size, ItemStack::empty()),
            None => self.lists.push(InventoryList::new(name, size)),
        }
    }

    pub fn get_stack(&self, name: &str, index: usize) -> Option<&ItemStack> {
        self.get_list(name).and_then(|slots| slots.get(index))
    }

    pub fn set_stack(&mut self, name: &str, index: usize, stack: ItemStack) -> bool {
        let Some(list) = self.lists.iter_mut().find(|list| list.name == name) else {
            return false;
        };
        let Some(slot) = list.slots.get_mut(index) else {
            return false;
        };
        *slot = stack;
        true
    }

    /// Parses the textual inventory grammar. Slot lines arrive last slot
    /// first, so each list is reversed once complete.
    pub fn from_serialized_text(text: &str) -> Result<Self, InventoryError> {
        let mut inventory = InvRef::new();
        let mut current: Option<(InventoryList, usize)> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim_end_matches('\r');
            let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));

            match keyword {
                "" => break,
                "List" => {
                    let mut words = rest.split_whitespace();
                    let name = words.next().ok_or_else(|| InventoryError::Malformed {
                        line: line_number,
                        reason: "list without a name".to_string(),
                    })?;
                    let expected = words
                        .next()
                        .ok_or_else(|| InventoryError::Malformed {
                            line: line_number,
                            reason: "list without a size".to_string(),
                        })?
                        .parse::<usize>()
                        .map_err(|err| InventoryError::Malformed {
                            line: line_number,
                            reason: err.to_string(),
                        })?;
                    if let Some((list, expected)) = current.take() {
                        inventory.finish_list(list, expected)?;
                    }
                    let list = InventoryList {
                        name: name.to_string(),
                        slots: Vec::with_capacity(expected),
                    };
                    current = Some((list, expected));
                }
                "Width" => {}
                "Item" | "Empty" => {
                    let (list, expected) = current
                        .as_mut()
                        .ok_or(InventoryError::ItemOutsideList { line: line_number })?;
                    if list.slots.len() >= *expected {
                        return Err(InventoryError::UnexpectedItem { line: line_number });
                    }
                    let stack = if keyword == "Empty" {
                        ItemStack::empty()
                    } else {
                        ItemStack::from_serialized_text(rest).map_err(|reason| {
                            InventoryError::Malformed {
                                line: line_number,
                                reason,
                            }
                        })?
                    };
                    list.slots.push(stack);
                }
                "EndInventoryList" => {
                    if let Some((list, expected)) = current.take() {
                        inventory.finish_list(list, expected)?;
                    }
                }
                INVENTORY_END => break,
                _ => {}
            }
        }

        if let Some((list, expected)) = current.take() {
            inventory.finish_list(list, expected)?;
        }

        Ok(inventory)
    }

    fn finish_list(&mut self, mut list: InventoryList, expected: usize) -> Result<(), InventoryError> {
        if list.slots.len() < expected {
            return Err(InventoryError::TooFewItems { list: list.name });
        }
        list.slots.reverse();
        self.set_list(&list.name, list.slots);
        Ok(())
    }

    pub fn to_serialized_text(&self) -> String {
        let mut out = String::new();
        for list in &self.lists {
            out.push_str(&format!("List {} {}\n", list.name, list.slots.len()));
            out.push_str("Width 0\n");
            for stack in list.slots.iter().rev() {
                if stack.is_empty() {
                    out.push_str("Empty\n");
                } else {
                    out.push_str(&format!("Item {}\n", stack.to_serialized_text()));
                }
            }
            out.push_str("EndInventoryList\n");
        }
        out.push_str(INVENTORY_END);
        out.push('\n');
        out
    }

    /// Reads one embedded inventory, ending at the first `EndInventory` line.
    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, InventoryError> {
        let marker = format!("{INVENTORY_END}\n");
        let bytes = reader.read_until(marker.as_bytes())?;
        Self::from_serialized_text(&latin1_decode(&bytes))
    }
}
