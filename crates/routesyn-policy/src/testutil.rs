//! Shared fixtures for unit tests.

use std::collections::BTreeMap;
use std::rc::Rc;

use routesyn_smt::{SolverContext, Sort};

use crate::announcements::{
    Announcement, AnnouncementSet, Community, AS_PATH_DOMAIN, NEXT_HOP_DOMAIN, ORIGIN_DOMAIN,
    PEER_DOMAIN, PREFIX_DOMAIN,
};

/// A context with the usual small topology registered.
pub fn ctx() -> Rc<SolverContext> {
    let ctx = SolverContext::new();
    ctx.register_enum_type(PREFIX_DOMAIN, &["10.0.0.0/8", "10.1.0.0/16", "192.168.0.0/16"])
        .unwrap();
    ctx.register_enum_type(PEER_DOMAIN, &["r1", "r2", "r3"]).unwrap();
    ctx.register_enum_type(ORIGIN_DOMAIN, &["igp", "ebgp", "incomplete"])
        .unwrap();
    ctx.register_enum_type(NEXT_HOP_DOMAIN, &["r1-hop", "r2-hop", "r3-hop"])
        .unwrap();
    ctx.register_enum_type(AS_PATH_DOMAIN, &["p100", "p200"]).unwrap();
    ctx.register_community("100:10");
    ctx.register_community("100:20");
    Rc::new(ctx)
}

/// A fully concrete announcement; lanes cycle through peers r1, r2, r3.
pub fn concrete_ann(ctx: &Rc<SolverContext>, lane: usize) -> Announcement {
    let domain = |name: &str| ctx.get_enum_type(name).unwrap();
    let peers = ["r1", "r2", "r3"];
    let mut communities = BTreeMap::new();
    communities.insert(Community::new("100:10"), ctx.bool_literal(true));
    communities.insert(Community::new("100:20"), ctx.bool_literal(false));
    Announcement {
        prefix: domain(PREFIX_DOMAIN).get_symbolic_value("10.0.0.0/8").unwrap(),
        peer: domain(PEER_DOMAIN)
            .get_symbolic_value(peers[lane % peers.len()])
            .unwrap(),
        origin: domain(ORIGIN_DOMAIN).get_symbolic_value("ebgp").unwrap(),
        next_hop: domain(NEXT_HOP_DOMAIN).get_symbolic_value("r1-hop").unwrap(),
        as_path: domain(AS_PATH_DOMAIN).get_symbolic_value("p100").unwrap(),
        as_path_len: ctx.int_literal(3),
        local_pref: ctx.int_literal(100),
        med: ctx.int_literal(0),
        permitted: ctx.bool_literal(true),
        communities,
    }
}

pub fn concrete_set(ctx: &Rc<SolverContext>, lanes: usize) -> Rc<AnnouncementSet> {
    AnnouncementSet::new((0..lanes).map(|i| concrete_ann(ctx, i)).collect()).unwrap()
}

/// Like [`concrete_set`], but every lane's peer is a free symbolic var.
pub fn symbolic_peer_set(ctx: &Rc<SolverContext>, lanes: usize) -> Rc<AnnouncementSet> {
    let anns = (0..lanes)
        .map(|i| {
            let mut ann = concrete_ann(ctx, i);
            ann.peer = ctx
                .create_fresh_var(Sort::Enum(PEER_DOMAIN.to_string()), "peer_", None)
                .unwrap();
            ann
        })
        .collect();
    AnnouncementSet::new(anns).unwrap()
}
