use std::collections::BTreeMap;

use inlet_core::{Channel, ChannelId, ChannelType, ChannelUuid, Msg, OrgId, Urn};
use inlet_store::{MessageStore, SqliteStore};
use tempfile::TempDir;

fn channel() -> Channel {
    Channel {
        id: ChannelId(1),
        uuid: ChannelUuid::new(),
        org_id: OrgId(7),
        channel_type: ChannelType::new("EX"),
        name: "External".into(),
        address: "2020".into(),
        country: None,
        schemes: Vec::new(),
        config: BTreeMap::new(),
    }
}

#[tokio::test]
async fn rows_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inlet.db");
    let ch = channel();
    let msg = Msg::new_incoming(&ch, Urn::parse("tel:+15551234").unwrap(), "persisted");

    let id = {
        let store = SqliteStore::open(&path).unwrap();
        store.add_channel(&ch).await.unwrap();
        store.insert_msg(&ch, &msg).await.unwrap().id
    };

    let reopened = SqliteStore::open(&path).unwrap();
    reopened.ping().await.unwrap();
    let stored = reopened.msg_by_id(id).await.unwrap().expect("row persisted");
    assert_eq!(stored.uuid, msg.uuid);
    assert_eq!(stored.text, "persisted");
    assert_eq!(reopened.count_msgs().await.unwrap(), 1);
    assert_eq!(reopened.count_msgs_with_uuid(msg.uuid).await.unwrap(), 1);
}
