mod highlevel;
mod lowlevel;

pub(crate) use highlevel::{NodeArena, NodeId};
pub(crate) use lowlevel::LowLevelNode;
