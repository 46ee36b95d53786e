//! # Contracts
//!
//! Static descriptions of the interfaces objects serve, built once per
//! interface by `contract!`. A contract's `name` is its type id on the wire.

use std::any::Any;
use std::sync::Arc;

use crate::error::Error;
use crate::error::Result;
use crate::proxy::ProxyCore;

/// Builds a typed view (`Box<Arc<dyn Trait>>`) of a proxy.
pub type ViewFn = fn(Arc<ProxyCore>) -> Box<dyn Any + Send + Sync>;

pub struct Contract {
    pub name: &'static str,
    pub extends: &'static [fn() -> &'static Contract],
    pub members: &'static [Member],
    pub view: ViewFn,
}

impl std::fmt::Debug for Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contract").field("name", &self.name).finish_non_exhaustive()
    }
}

impl PartialEq for Contract {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

impl Contract {
    /// This contract followed by every contract it extends, transitively.
    pub fn ancestry(&'static self) -> Vec<&'static Contract> {
        let mut out = vec![self];
        let mut stack: Vec<&'static Contract> = self.extends.iter().map(|base| base()).collect();
        while let Some(base) = stack.pop() {
            if !out.iter().any(|c| c.name == base.name) {
                out.push(base);
                stack.extend(base.extends.iter().map(|b| b()));
            }
        }
        out
    }

    /// This contract's name and those of every contract it extends, transitively.
    pub fn lineage(&'static self) -> Vec<&'static str> {
        self.ancestry().into_iter().map(|c| c.name).collect()
    }

    pub fn is_a(&'static self, name: &str) -> bool {
        self.ancestry().iter().any(|c| c.name == name)
    }

    pub fn member(&self, name: &str) -> Option<&'static Member> {
        self.members.iter().find(|m| m.name == name)
    }

    /// The root contract every object serves.
    pub fn is_root(&self) -> bool {
        std::ptr::eq(self, &OBJECT)
    }
}

/// What a member is, by its accessor naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Method,
    Getter,
    Setter,
    EventAdd,
    EventRemove,
}

impl std::fmt::Display for MemberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MemberKind::Method => "method",
            MemberKind::Getter => "getter",
            MemberKind::Setter => "setter",
            MemberKind::EventAdd => "event adder",
            MemberKind::EventRemove => "event remover",
        })
    }
}

#[derive(Debug)]
pub struct Member {
    pub name: &'static str,
    pub arity: usize,
}

impl Member {
    pub fn kind(&self) -> MemberKind {
        let n = self.name;
        if n.starts_with("get_") && self.arity == 0 {
            MemberKind::Getter
        } else if n.starts_with("set_") && self.arity == 1 {
            MemberKind::Setter
        } else if n.starts_with("add_") && self.arity == 1 {
            MemberKind::EventAdd
        } else if n.starts_with("remove_") && self.arity == 1 {
            MemberKind::EventRemove
        } else {
            MemberKind::Method
        }
    }
}

/// Contract of `dyn RemoteObject`: no members, matches any object.
pub static OBJECT: Contract = Contract {
    name: "orb.Object",
    extends: &[],
    members: &[],
    view: crate::proxy::view_of::<dyn crate::object::RemoteObject>,
};

/// Every type id an object answers to: each served contract's lineage,
/// then the concrete type name.
pub fn type_ids(contracts: &[&'static Contract], type_name: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for contract in contracts {
        for name in contract.lineage() {
            if !ids.iter().any(|id| id == name) {
                ids.push(name.to_string());
            }
        }
    }
    if !ids.iter().any(|id| id == type_name) {
        ids.push(type_name.to_string());
    }
    ids
}

/// Resolves an incoming member name against the contracts an object serves,
/// including every contract they extend.
///
/// A unique name wins outright. A name declared by several contracts is
/// disambiguated by argument count. Failing both, `Contract.member` names the
/// contract explicitly.
pub fn resolve(
    contracts: &[&'static Contract],
    name: &str,
    arity: usize,
) -> Result<(&'static Contract, &'static Member)> {
    let mut served: Vec<&'static Contract> = Vec::new();
    for contract in contracts {
        for c in contract.ancestry() {
            if !served.iter().any(|s| s.name == c.name) {
                served.push(c);
            }
        }
    }

    let candidates: Vec<(&'static Contract, &'static Member)> = served
        .iter()
        .filter_map(|c| c.member(name).map(|m| (*c, m)))
        .collect();

    let found = match candidates.as_slice() {
        [] => qualified(&served, name),
        [only] => Some(*only),
        many => many.iter().find(|(_, m)| m.arity == arity).copied(),
    };

    let (contract, member) = found.ok_or_else(|| Error::unresolvable(format!("member '{}'", name)))?;
    if member.arity != arity {
        return Err(Error::bad_arguments(format!(
            "{} '{}.{}' takes {} arguments, got {}",
            member.kind(),
            contract.name,
            member.name,
            member.arity,
            arity
        )));
    }
    Ok((contract, member))
}

fn qualified(contracts: &[&'static Contract], name: &str) -> Option<(&'static Contract, &'static Member)> {
    let (contract, member) = name.rsplit_once('.')?;
    let contract = contracts.iter().find(|c| c.name == contract)?;
    contract.member(member).map(|m| (*contract, m))
}
