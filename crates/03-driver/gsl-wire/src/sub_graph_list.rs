use crate::{read_sg_id, require, sg_id_bytes, WireResult};
use gsl_types::SgId;

/// A connection between two subgraph ports, as packed into the
/// `SUB_GRAPH_LIST` parameter's trailing edge-connections blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    pub src_sg: SgId,
    pub dst_sg: SgId,
}

/// The `SUB_GRAPH_LIST` parameter payload sent with `GRAPH_OPEN`/`GRAPH_CLOSE`:
/// a subgraph-id array followed by an edge-connections array, each prefixed
/// by its element count, all fields 8-byte aligned per §9's shared-memory
/// payload convention.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubGraphList {
    pub sg_ids: Vec<SgId>,
    pub edges: Vec<Edge>,
}

impl SubGraphList {
    pub fn new(sg_ids: Vec<SgId>, edges: Vec<Edge>) -> Self {
        Self { sg_ids, edges }
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.sg_ids.len() * 4 + 4 + self.edges.len() * 8
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&(self.sg_ids.len() as u32).to_le_bytes());
        for id in &self.sg_ids {
            out.extend_from_slice(&sg_id_bytes(*id));
        }
        out.extend_from_slice(&(self.edges.len() as u32).to_le_bytes());
        for edge in &self.edges {
            out.extend_from_slice(&sg_id_bytes(edge.src_sg));
            out.extend_from_slice(&sg_id_bytes(edge.dst_sg));
        }
        out
    }

    pub fn decode(buf: &[u8]) -> WireResult<Self> {
        require(buf, 4)?;
        let num_sgs = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let mut offset = 4;
        require(buf, offset + num_sgs * 4)?;
        let mut sg_ids = Vec::with_capacity(num_sgs);
        for _ in 0..num_sgs {
            sg_ids.push(read_sg_id(&buf[offset..offset + 4]));
            offset += 4;
        }

        require(buf, offset + 4)?;
        let num_edges = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        offset += 4;
        require(buf, offset + num_edges * 8)?;
        let mut edges = Vec::with_capacity(num_edges);
        for _ in 0..num_edges {
            let src_sg = read_sg_id(&buf[offset..offset + 4]);
            let dst_sg = read_sg_id(&buf[offset + 4..offset + 8]);
            edges.push(Edge { src_sg, dst_sg });
            offset += 8;
        }

        Ok(Self { sg_ids, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sgs_and_edges() {
        let list = SubGraphList::new(
            vec![SgId(0xA), SgId(0xB)],
            vec![Edge {
                src_sg: SgId(0xA),
                dst_sg: SgId(0xB),
            }],
        );
        let encoded = list.encode();
        assert_eq!(encoded.len(), list.encoded_len());
        let decoded = SubGraphList::decode(&encoded).expect("decode");
        assert_eq!(decoded, list);
    }

    #[test]
    fn empty_list_encodes_to_two_counts() {
        let list = SubGraphList::default();
        assert_eq!(list.encode(), 0u32.to_le_bytes().repeat(2));
    }
}
