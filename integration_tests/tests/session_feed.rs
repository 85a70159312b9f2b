mod common;

use std::time::Duration;

use monitor_core::{
    ChangeStream, ChannelFeed, Entity, EntityEvent, FeedError, FeedSource, FeedSubscription,
    StreamMessage,
};
use monitor_proto::{
    decode_frame, decode_frame_json, encode_frame, encode_frame_json, length_prefixed, ClientId,
    FeedFrame, FeedMessage, WorldId,
};

/// Transport that does no routing: every subscription reads the same channel.
struct UnroutedSource {
    receiver: crossbeam_channel::Receiver<FeedFrame>,
}

impl FeedSource for UnroutedSource {
    fn subscribe(
        &mut self,
        client: &ClientId,
        world: WorldId,
    ) -> Result<FeedSubscription, FeedError> {
        Ok(FeedSubscription::new(
            client.clone(),
            world,
            self.receiver.clone(),
        ))
    }
}

#[test]
fn replaying_sample_feed_builds_every_view() -> anyhow::Result<()> {
    let frames = common::load_feed_sample()?;
    let mut feed = ChannelFeed::new();
    let mut session = common::session();
    session.switch_world(&mut feed, WorldId(7))?;

    for frame in frames {
        feed.publish(frame);
    }
    let applied = session.pump(Duration::from_millis(10));
    assert_eq!(applied, 5);
    // The world-8 frame is never routed to a world-7 subscriber.
    assert_eq!(session.stats().frames_dropped, 0);

    // 102 was deleted, 900 belongs to another world.
    assert_eq!(session.entities().len(), 2);
    assert!(session.entities().get(900).is_none());
    assert_eq!(session.server_counts().get(1), 1);
    assert_eq!(session.server_counts().get(2), 1);
    assert_eq!(session.type_counts().get(5), 2);

    assert_eq!(session.processes().len(), 2);
    assert_eq!(session.processes().online_count(), 2);
    assert_ne!(
        session.processes().color_of(1),
        session.processes().color_of(2)
    );

    assert_eq!(session.cells().len(), 3);
    assert_eq!(session.cells().loaded_count(), 2);
    assert_eq!(session.regions().regions().len(), 2);

    assert_eq!(session.frames().durations(1), vec![16.5, 17.25]);
    assert_eq!(session.frames().latest(2).map(|s| s.duration_ms), Some(33.0));
    session.check_consistency();
    Ok(())
}

#[test]
fn unrouted_frames_for_other_worlds_are_dropped() -> anyhow::Result<()> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let mut source = UnroutedSource { receiver };
    let mut session = common::session();
    session.switch_world(&mut source, WorldId(7))?;

    for frame in common::load_feed_sample()? {
        sender.send(frame)?;
    }
    assert_eq!(session.pump(Duration::from_millis(10)), 5);
    assert_eq!(session.stats().frames_dropped, 1);
    assert!(session.entities().get(900).is_none());
    let before = session.entities().len();

    sender.send(FeedFrame::new(
        WorldId(8),
        FeedMessage::Entities(vec![common::entity(901, [0.0; 3], 1, 1)]),
    ))?;
    assert_eq!(session.pump(Duration::from_millis(20)), 0);
    assert_eq!(session.stats().frames_dropped, 2);
    assert_eq!(session.entities().len(), before);
    assert!(session.entities().get(901).is_none());
    session.check_consistency();
    Ok(())
}

#[test]
fn world_switch_detaches_and_resets_listeners() -> anyhow::Result<()> {
    let mut feed = ChannelFeed::new();
    let mut session = common::session();
    session.switch_world(&mut feed, WorldId(1))?;
    let mut stream: ChangeStream<Entity> = ChangeStream::default();
    let (_, receiver) = stream.subscribe_channel();
    session.subscribe_entities(Box::new(move |event: &EntityEvent| {
        stream.publish(event);
    }));

    feed.publish_message(
        WorldId(1),
        FeedMessage::Entities(vec![common::entity(1, [0.0; 3], 1, 1)]),
    );
    session.pump(Duration::ZERO);
    session.select([1]);
    assert_eq!(session.selection().len(), 1);

    session.switch_world(&mut feed, WorldId(2))?;
    assert_eq!(feed.subscriber_count(WorldId(1)), 0);
    assert_eq!(
        feed.publish_message(
            WorldId(1),
            FeedMessage::Entities(vec![common::entity(2, [0.0; 3], 1, 1)]),
        ),
        0
    );
    session.pump(Duration::ZERO);

    assert!(session.entities().is_empty());
    assert!(session.instances().is_empty());
    assert!(session.selection().is_empty());
    assert_eq!(session.server_counts().total(), 0);

    let received: Vec<_> = receiver.try_iter().collect();
    assert_eq!(received.len(), 1);
    assert!(matches!(received[0], StreamMessage::Change(_)));
    session.check_consistency();
    Ok(())
}

#[test]
fn detached_session_ignores_feed() -> anyhow::Result<()> {
    let mut feed = ChannelFeed::new();
    let mut session = common::session();
    session.switch_world(&mut feed, WorldId(1))?;
    session.detach();
    assert!(!session.is_attached());
    assert_eq!(
        feed.publish_message(
            WorldId(1),
            FeedMessage::Entities(vec![common::entity(1, [0.0; 3], 1, 1)]),
        ),
        0
    );
    assert_eq!(session.pump(Duration::ZERO), 0);
    Ok(())
}

#[test]
fn several_clients_share_one_world() -> anyhow::Result<()> {
    let mut feed = ChannelFeed::new();
    let first = feed.subscribe(&ClientId::new("a"), WorldId(3))?;
    let second = feed.subscribe(&ClientId::new("b"), WorldId(3))?;
    assert_eq!(
        feed.publish_message(WorldId(3), FeedMessage::Frames(Vec::new())),
        2
    );
    assert!(first.try_next().is_some());
    assert!(second.try_next().is_some());
    Ok(())
}

#[test]
fn sample_frames_survive_both_codecs() -> anyhow::Result<()> {
    for frame in common::load_feed_sample()? {
        let bytes = encode_frame(&frame)?;
        let framed = length_prefixed(&bytes)?;
        let len = u32::from_le_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        assert_eq!(len, bytes.len());
        assert_eq!(decode_frame(&framed[4..])?, frame);

        let text = encode_frame_json(&frame)?;
        assert_eq!(decode_frame_json(&text)?, frame);
    }
    Ok(())
}
