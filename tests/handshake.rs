//! Handshake convergence over both transports.

use lockstep::connection::{ConnectionGuideline, ConnectionProtocol, Connections, RetryPolicy};
use lockstep::context::SimContext;
use lockstep::mailbox::MailboxConfig;
use lockstep::network::{AgentId, InMemoryBroker, MailboxTransport, Transport};
use lockstep::organization::Organization;
use std::sync::Arc;

fn guidelines(me: &str) -> Connections {
    let list = match me {
        "Parent" => vec![
            ConnectionGuideline::to_child("Child1", "org", "Parent").unwrap(),
            ConnectionGuideline::to_child("Child2", "org", "Parent").unwrap(),
        ],
        _ => vec![ConnectionGuideline::to_parent("Parent", "org", "Parent").unwrap()],
    };
    Connections::new(me, list)
}

/// Parent with two children over a lossless broker
#[test]
fn test_star_converges_over_broker() {
    let ctx = SimContext::new(7);
    ctx.graph.set_expected(2);
    let broker: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());

    let protocols: Vec<ConnectionProtocol> = ["Parent", "Child1", "Child2"]
        .iter()
        .map(|id| {
            ConnectionProtocol::new(
                &AgentId::new(*id).unwrap(),
                guidelines(id),
                &ctx,
                broker.clone(),
                RetryPolicy::default(),
            )
            .unwrap()
        })
        .collect();

    let mut rounds = 0;
    while !protocols.iter().all(|p| p.is_all_connected()) {
        rounds += 1;
        assert!(rounds <= 10, "no convergence after 10 rounds");
        for p in &protocols {
            p.check_up_connections().unwrap();
            p.check_down_connections().unwrap();
        }
    }

    assert_eq!(ctx.graph.keys(), vec!["Child1 - Parent", "Child2 - Parent"]);
    assert!(ctx.graph.is_complete());
    assert!(protocols[0].unconnected_children().is_empty());
}

/// Both ends recording the same link leaves one canonical entry
#[test]
fn test_link_recorded_once_from_either_end() {
    let ctx = SimContext::new(1);
    assert!(ctx.graph.insert("B", "A"));
    assert!(!ctx.graph.insert("A", "B"));
    assert_eq!(ctx.graph.keys(), vec!["A - B"]);
}

/// Same star, but hellos ride the mailboxes and take a turn to arrive
#[test]
fn test_star_converges_over_mailboxes() {
    let ctx = SimContext::shared(11);
    ctx.graph.set_expected(2);
    let org = Organization::new("org", ctx.clone(), None);

    let agents: Vec<_> = ["Parent", "Child1", "Child2"]
        .iter()
        .map(|id| {
            let agent = org.create_agent(id, "node", MailboxConfig::default()).unwrap();
            let transport = MailboxTransport::attach(agent.mailbox().clone()).unwrap();
            let protocol =
                ConnectionProtocol::new(agent.id(), guidelines(id), &ctx, Arc::new(transport), RetryPolicy::default())
                    .unwrap();
            (agent, protocol)
        })
        .collect();

    std::thread::scope(|s| {
        for (agent, protocol) in &agents {
            let org = &org;
            s.spawn(move || {
                for turn in 0..12 {
                    agent.mailbox().reset();
                    if turn == 0 {
                        protocol.connect_up().unwrap();
                        protocol.connect_down().unwrap();
                        // Hellos from this turn cannot have arrived yet
                        let pending = protocol.unconnected_parents().len() + protocol.unconnected_children().len();
                        assert!(pending > 0);
                    } else {
                        protocol.check_up_connections().unwrap();
                        protocol.check_down_connections().unwrap();
                    }
                    org.end_turn(agent.id()).unwrap();
                }
            });
        }
    });

    assert_eq!(ctx.graph.keys(), vec!["Child1 - Parent", "Child2 - Parent"]);
    assert!(agents.iter().all(|(_, p)| p.is_all_connected()));
    assert_eq!(org.turn(), 12);
}
