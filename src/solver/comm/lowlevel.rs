use crate::map::VertexId;

/// Constraint node of the low-level search: agents `who[k]` are fixed to
/// `location[k]` in the next configuration, the rest are left to PIBT.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct LowLevelNode {
    pub(crate) who: Vec<usize>,
    pub(crate) location: Vec<VertexId>,
    pub(crate) depth: usize,
}

impl LowLevelNode {
    pub(crate) fn root() -> Self {
        LowLevelNode::default()
    }

    pub(crate) fn child(&self, agent: usize, v: VertexId) -> Self {
        let mut who = Vec::with_capacity(self.depth + 1);
        who.extend_from_slice(&self.who);
        who.push(agent);
        let mut location = Vec::with_capacity(self.depth + 1);
        location.extend_from_slice(&self.location);
        location.push(v);

        LowLevelNode {
            who,
            location,
            depth: self.depth + 1,
        }
    }

    pub(crate) fn constraints(&self) -> impl Iterator<Item = (usize, VertexId)> + '_ {
        self.who.iter().copied().zip(self.location.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_extends_constraints() {
        let root = LowLevelNode::root();
        let child = root.child(2, VertexId(5)).child(0, VertexId(1));

        assert_eq!(root.depth, 0);
        assert_eq!(child.depth, 2);
        assert_eq!(
            child.constraints().collect::<Vec<_>>(),
            vec![(2, VertexId(5)), (0, VertexId(1))]
        );
    }
}
