use anyhow::Context;
use draft_publish::{
    DiffOptions, EditableStatus, Record, Registry, TextFormat, TypeConfig, Value, VersionError,
    VersionPolicy, VersionService,
};
use sled::open;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tempfile::tempdir; // Use for test db cleanup.

// RUST_LOG=draft_publish=debug shows the engine's logs for a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn house_registry(house: TypeConfig) -> Registry {
    Registry::builder()
        .register(house.has_many("rooms", "room", "house_id"))
        .register(
            TypeConfig::new("room")
                .has_many("closets", "closet", "room_id")
                .has_many("trim_styles", "trim_style", "room_id")
                .has_one("flooring", "flooring_style", "room_id")
                .tracks_history(true),
        )
        .register(TypeConfig::new("closet").has_many("coats", "coat", "closet_id"))
        .register(TypeConfig::new("coat"))
        .register(TypeConfig::new("trim_style").without_version_link())
        .register(TypeConfig::new("flooring_style"))
        .register(
            TypeConfig::new("shed")
                .has_many("tools", "tool", "shed_id")
                .requires_approval(false),
        )
        .register(TypeConfig::new("tool"))
        .register(TypeConfig::new("barn").tracks_history(true).allow_historic_edits(true))
        .build()
        .unwrap()
}

// Sled uses file-based locking to prevent concurrent access, so every test gets
// its own database under a temp dir for simplified cleanup.
fn service_with(name: &str, house: TypeConfig) -> anyhow::Result<(tempfile::TempDir, VersionService)> {
    init_tracing();
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join(name))?);
    let service = VersionService::new(db, house_registry(house))?;
    Ok((temp_dir, service))
}

fn service(name: &str) -> anyhow::Result<(tempfile::TempDir, VersionService)> {
    service_with(name, TypeConfig::new("house"))
}

struct House {
    house: Record,
    room: Record,
    walk_in: Record,
    wall: Record,
}

/// A Ranch with one living room holding a walk-in and a wall closet.
fn ranch(service: &VersionService) -> anyhow::Result<House> {
    let house = service.create(Record::new("house").set("style", "Ranch"))?;
    let room = service.create(
        Record::new("room")
            .set("name", "Living Room")
            .set("house_id", house.id),
    )?;
    let walk_in = service.create(
        Record::new("closet")
            .set("style", "walk-in")
            .set("hidden", false)
            .set("room_id", room.id),
    )?;
    let wall = service.create(
        Record::new("closet")
            .set("style", "wall")
            .set("hidden", false)
            .set("room_id", room.id),
    )?;
    Ok(House {
        house,
        room,
        walk_in,
        wall,
    })
}

fn historic_count(service: &VersionService, type_name: &str) -> anyhow::Result<usize> {
    Ok(service
        .all_of_type(type_name)?
        .iter()
        .filter(|record| record.is_historic())
        .count())
}

#[test]
fn publish_promotes_draft_tree() -> anyhow::Result<()> {
    let (_dir, service) = service("test_publish_tree.db")?;
    let House { house, .. } = ranch(&service)?;
    let room_history = historic_count(&service, "room")?;

    let mut draft = service
        .get_or_create_draft(house.id)
        .context("Draft Failed on Create: ")?;
    assert!(service.is_draft(&draft)?);
    assert!(service.has_draft(&house)?);

    let mut draft_room = service.child(&draft, "rooms")?.context("draft room")?;
    assert!(draft_room.is_draft());
    assert_eq!(service.children(&draft_room, "closets")?.len(), 2);

    draft.assign("style", "Victorian");
    service.save(&mut draft)?;
    draft_room.assign("name", "Parlor");
    service.save(&mut draft_room)?;

    let published = service.publish(house.id).context("Publish Failed: ")?;

    assert_eq!(published.id, house.id);
    assert_eq!(published.text("style"), Some("Victorian"));
    assert!(service.drafts_of(house.id)?.is_empty());
    assert!(!service.has_draft(&published)?);

    let rooms = service.children(&published, "rooms")?;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].text("name"), Some("Parlor"));
    assert_eq!(rooms[0].approved_version_id, None);

    let closets = service.children(&rooms[0], "closets")?;
    assert_eq!(closets.len(), 2);
    assert!(closets.iter().all(|closet| closet.approved_version_id.is_none()));

    // publishing the house does not archive its rooms, and nothing draft-like survives
    assert_eq!(historic_count(&service, "room")?, room_history);
    assert!(service.all_of_type("house")?.len() == 1);
    assert!(
        service
            .all_of_type("closet")?
            .iter()
            .all(|closet| !closet.is_draft())
    );
    assert_eq!(service.all_of_type("closet")?.len(), 2);

    Ok(())
}

#[test]
fn edited_closets_replace_the_approved_ones() -> anyhow::Result<()> {
    let (_dir, service) = service("test_house_scenario.db")?;
    let House { house, .. } = ranch(&service)?;

    let draft = service.get_or_create_draft(house.id)?;
    let mut draft_room = service.child(&draft, "rooms")?.context("draft room")?;
    draft_room.assign("name", "Parlor");
    service.save(&mut draft_room)?;

    for mut closet in service.children(&draft_room, "closets")? {
        match closet.text("style") {
            Some("wall") => {
                closet.assign("style", "hidden");
                service.save(&mut closet)?;
            }
            Some("walk-in") => {
                service.delete(closet.id)?;
            }
            _ => {}
        }
    }
    service.create(
        Record::new("closet")
            .set("style", "coat")
            .set("room_id", draft_room.id),
    )?;

    let published = service.publish(house.id)?;

    assert_eq!(published.text("style"), Some("Ranch"));
    let room = service.child(&published, "rooms")?.context("room")?;
    assert_eq!(room.text("name"), Some("Parlor"));
    let mut styles: Vec<_> = service
        .children(&room, "closets")?
        .iter()
        .filter_map(|closet| closet.text("style").map(str::to_string))
        .collect();
    styles.sort();
    assert_eq!(styles, vec!["coat", "hidden"]);
    assert!(service.drafts_of(house.id)?.is_empty());
    Ok(())
}

#[test]
fn publish_without_draft_is_a_no_op() -> anyhow::Result<()> {
    let (_dir, service) = service("test_publish_no_draft.db")?;
    let House { house, .. } = ranch(&service)?;

    let published = service.publish(house.id)?;

    assert_eq!(published, house);
    Ok(())
}

#[test]
fn publish_through_the_draft_id() -> anyhow::Result<()> {
    let (_dir, service) = service("test_publish_via_draft.db")?;
    let House { house, .. } = ranch(&service)?;

    let mut draft = service.get_or_create_draft(house.id)?;
    draft.assign("style", "Cape Cod");
    service.save(&mut draft)?;

    let published = service.publish(draft.id)?;

    assert_eq!(published.id, house.id);
    assert_eq!(published.text("style"), Some("Cape Cod"));
    assert!(service.get(draft.id)?.is_none());
    Ok(())
}

#[test]
fn deleted_draft_member_is_removed_on_publish() -> anyhow::Result<()> {
    let (_dir, service) = service("test_delete_member.db")?;
    let House { house, .. } = ranch(&service)?;

    let draft = service.get_or_create_draft(house.id)?;
    let draft_room = service.child(&draft, "rooms")?.context("draft room")?;
    let walk_in = service
        .children(&draft_room, "closets")?
        .into_iter()
        .find(|closet| closet.text("style") == Some("walk-in"))
        .context("walk-in draft")?;
    assert!(service.delete(walk_in.id)?);

    let published = service.publish(house.id)?;

    let room = service.child(&published, "rooms")?.context("room")?;
    let closets = service.children(&room, "closets")?;
    assert_eq!(closets.len(), 1);
    assert_eq!(closets[0].text("style"), Some("wall"));
    Ok(())
}

#[test]
fn get_or_create_draft_reuses_existing_draft() -> anyhow::Result<()> {
    let (_dir, service) = service("test_draft_reuse.db")?;
    let House { house, .. } = ranch(&service)?;

    let first = service.get_or_create_draft(house.id)?;
    let second = service.get_or_create_draft(house.id)?;
    let editable = service.editable_version(&house)?;

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, editable.id);
    assert_eq!(service.editable_version(&first)?.id, first.id);
    assert_eq!(service.drafts_of(house.id)?.len(), 1);
    assert_eq!(service.approved_version(&first)?, house);
    Ok(())
}

#[test]
fn draft_of_a_draft_is_rejected() -> anyhow::Result<()> {
    let (_dir, service) = service("test_draft_of_draft.db")?;
    let House { house, .. } = ranch(&service)?;
    let draft = service.get_or_create_draft(house.id)?;

    let result = service.create_draft(draft.id);

    assert!(matches!(result, Err(VersionError::InvalidRole { .. })));
    Ok(())
}

#[test]
fn concurrent_drafts_collapse_on_publish() -> anyhow::Result<()> {
    let (_dir, service) = service("test_draft_race.db")?;
    let House { house, .. } = ranch(&service)?;

    let mut first = service.create_draft(house.id)?;
    let second = service.create_draft(house.id)?;
    assert_ne!(first.id, second.id);
    assert_eq!(service.drafts_of(house.id)?.len(), 2);

    first.assign("style", "Victorian");
    service.save(&mut first)?;

    let published = service.publish(house.id)?;

    assert_eq!(published.text("style"), Some("Victorian"));
    assert!(service.drafts_of(house.id)?.is_empty());
    assert!(service.get(second.id)?.is_none());
    // the losing draft's copied rooms went with it
    assert_eq!(service.all_of_type("room")?.len(), 1);
    Ok(())
}

#[test]
fn nullified_attributes_are_published_as_null() -> anyhow::Result<()> {
    let (_dir, service) = service_with(
        "test_nullify.db",
        TypeConfig::new("house").nullify_on_draft_create(["inspected_on"]),
    )?;
    let house = service.create(
        Record::new("house")
            .set("style", "Ranch")
            .set("inspected_on", "2024-05-01"),
    )?;

    let draft = service.get_or_create_draft(house.id)?;
    assert_eq!(draft.get("inspected_on"), Some(&Value::Null));

    let published = service.publish(house.id)?;
    assert_eq!(published.get("inspected_on"), Some(&Value::Null));
    assert_eq!(published.text("style"), Some("Ranch"));
    Ok(())
}

#[test]
fn has_one_members_follow_the_draft() -> anyhow::Result<()> {
    let (_dir, service) = service("test_has_one.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;
    service.create(
        Record::new("flooring_style")
            .set("material", "oak")
            .set("room_id", room.id),
    )?;

    let draft = service.get_or_create_draft(room.id)?;
    let mut flooring = service.child(&draft, "flooring")?.context("draft flooring")?;
    flooring.assign("material", "slate");
    service.save(&mut flooring)?;
    let published = service.publish(room.id)?;

    let flooring = service.child(&published, "flooring")?.context("flooring")?;
    assert_eq!(flooring.text("material"), Some("slate"));
    assert_eq!(service.all_of_type("flooring_style")?.len(), 2); // current + archived copy
    Ok(())
}

#[test]
fn publish_archives_previous_versions_newest_first() -> anyhow::Result<()> {
    let (_dir, service) = service("test_history.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;
    service.create(Record::new("closet").set("style", "wall").set("room_id", room.id))?;

    for name in ["Study", "Office"] {
        let mut draft = service.get_or_create_draft(room.id)?;
        draft.assign("name", name);
        service.save(&mut draft)?;
        service.publish(room.id)?;
    }

    let history = service.previous_versions(room.id)?;
    let names: Vec<_> = history.iter().map(|r| r.text("name")).collect();
    assert_eq!(names, vec![Some("Study"), Some("Den")]);
    assert!(history.iter().all(|r| r.current_approved_version_id == Some(room.id)));
    assert!(service.is_previous_version(&history[0])?);
    assert!(!service.is_previous_version(&room)?);

    let previous = service.previous_version(room.id)?.context("previous version")?;
    assert_eq!(previous.id, history[0].id);

    // archived versions keep copies of their members
    assert_eq!(service.children(&history[1], "closets")?.len(), 1);
    assert_eq!(service.find(room.id)?.text("name"), Some("Office"));
    Ok(())
}

#[test]
fn make_current_restores_a_previous_version() -> anyhow::Result<()> {
    let (_dir, service) = service("test_make_current.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;
    service.create(Record::new("closet").set("style", "wall").set("room_id", room.id))?;

    let mut draft = service.get_or_create_draft(room.id)?;
    draft.assign("name", "Study");
    service.save(&mut draft)?;
    let draft_closet = service.child(&draft, "closets")?.context("draft closet")?;
    service.delete(draft_closet.id)?;
    service.publish(room.id)?;
    assert!(service.children(&service.find(room.id)?, "closets")?.is_empty());

    let den = service.previous_version(room.id)?.context("den version")?;
    let restored = service.make_current(den.id)?;

    assert_eq!(restored.id, room.id);
    assert_eq!(restored.text("name"), Some("Den"));
    let closets = service.children(&restored, "closets")?;
    assert_eq!(closets.len(), 1);
    assert_eq!(closets[0].text("style"), Some("wall"));

    // the state that was replaced is archived and the restored version untouched
    let history = service.previous_versions(room.id)?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text("name"), Some("Study"));
    assert_eq!(service.find(den.id)?, den);
    assert_eq!(service.children(&den, "closets")?.len(), 1);
    Ok(())
}

#[test]
fn make_current_rejects_records_that_are_not_historic() -> anyhow::Result<()> {
    let (_dir, service) = service("test_make_current_approved.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;

    let result = service.make_current(room.id);

    assert!(matches!(result, Err(VersionError::NotHistoric(id)) if id == room.id));
    Ok(())
}

#[test]
fn historic_versions_are_read_only_unless_allowed() -> anyhow::Result<()> {
    let (_dir, service) = service("test_historic_edits.db")?;

    let room = service.create(Record::new("room").set("name", "Den"))?;
    let mut draft = service.get_or_create_draft(room.id)?;
    draft.assign("name", "Study");
    service.save(&mut draft)?;
    service.publish(room.id)?;

    let mut historic = service.previous_version(room.id)?.context("room history")?;
    historic.assign("name", "Rewritten");
    assert!(!service.save(&mut historic)?);
    assert_eq!(service.find(historic.id)?.text("name"), Some("Den"));

    let barn = service.create(Record::new("barn").set("color", "red"))?;
    let mut draft = service.get_or_create_draft(barn.id)?;
    draft.assign("color", "white");
    service.save(&mut draft)?;
    service.publish(barn.id)?;

    let mut historic = service.previous_version(barn.id)?.context("barn history")?;
    historic.assign("note", "repainted in spring");
    assert!(service.save(&mut historic)?);
    assert_eq!(
        service.find(historic.id)?.text("note"),
        Some("repainted in spring")
    );
    Ok(())
}

#[test]
fn save_checks_the_stored_role_of_a_historic_version() -> anyhow::Result<()> {
    let (_dir, service) = service("test_historic_stored_role.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;
    let mut draft = service.get_or_create_draft(room.id)?;
    draft.assign("name", "Study");
    service.save(&mut draft)?;
    service.publish(room.id)?;

    // a copy that lost its history link is still refused
    let historic = service.previous_version(room.id)?.context("room history")?;
    let mut unlinked = historic.clone().set("name", "Rewritten");
    unlinked.current_approved_version_id = None;
    let before = unlinked.clone();

    assert!(!service.save(&mut unlinked)?);
    assert_eq!(unlinked, before);
    assert_eq!(service.find(historic.id)?, historic);
    Ok(())
}

#[test]
fn types_without_approval_are_edited_in_place() -> anyhow::Result<()> {
    let (_dir, service) = service("test_no_approval.db")?;
    let shed = service.create(Record::new("shed").set("size", 8_i64))?;

    let editable = service.editable_version(&shed)?;
    let same = service.get_or_create_draft(shed.id)?;
    let published = service.publish(shed.id)?;

    assert_eq!(editable.id, shed.id);
    assert_eq!(same.id, shed.id);
    assert_eq!(published, shed);
    assert!(service.drafts_of(shed.id)?.is_empty());
    Ok(())
}

#[test]
fn diff_of_a_type_without_approval_compares_members_with_themselves() -> anyhow::Result<()> {
    let (_dir, service) = service("test_no_approval_diff.db")?;
    let shed = service.create(Record::new("shed").set("size", 8_i64))?;
    service.create(Record::new("tool").set("name", "rake").set("shed_id", shed.id))?;

    let options = DiffOptions {
        include_associations: true,
        include_unchanged: true,
        ..service.diff_options()
    };
    let tree = service.diff(&shed, &options)?;

    assert_eq!(tree.status, EditableStatus::Unchanged);
    let tools = tree.members("tools");
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].status, EditableStatus::Unchanged);
    assert!(service.drafts_of(shed.id)?.is_empty());

    let options = DiffOptions {
        include_associations: true,
        ..service.diff_options()
    };
    assert!(service.diff(&shed, &options)?.associations.is_empty());
    Ok(())
}

#[test]
fn publishing_a_draft_moves_the_record_to_its_new_parent() -> anyhow::Result<()> {
    let (_dir, service) = service("test_move_room.db")?;
    let ranch = service.create(Record::new("house").set("style", "Ranch"))?;
    let cabin = service.create(Record::new("house").set("style", "Cabin"))?;
    let room = service.create(
        Record::new("room")
            .set("name", "Den")
            .set("house_id", ranch.id),
    )?;

    let mut draft = service.get_or_create_draft(room.id)?;
    assert_eq!(draft.get("house_id"), Some(&Value::Ref(ranch.id)));
    draft.assign("house_id", cabin.id);
    service.save(&mut draft)?;

    // the draft is not listed under either house until it is published
    assert_eq!(service.children(&ranch, "rooms")?, vec![room.clone()]);
    assert!(service.children(&cabin, "rooms")?.is_empty());

    let published = service.publish(room.id)?;

    assert_eq!(published.get("house_id"), Some(&Value::Ref(cabin.id)));
    let cabin_rooms: Vec<_> = service
        .children(&cabin, "rooms")?
        .iter()
        .map(|room| room.id)
        .collect();
    assert_eq!(cabin_rooms, vec![room.id]);
    assert!(service.children(&ranch, "rooms")?.is_empty());
    // the archived room still names the old house without being one of its rooms
    let previous = service.previous_version(room.id)?.context("room history")?;
    assert_eq!(previous.get("house_id"), Some(&Value::Ref(ranch.id)));
    Ok(())
}

#[test]
fn types_without_version_link_cannot_be_drafted() -> anyhow::Result<()> {
    let (_dir, service) = service("test_missing_link.db")?;
    let trim = service.create(Record::new("trim_style").set("style", "crown"))?;

    let result = service.get_or_create_draft(trim.id);
    assert!(matches!(
        result,
        Err(VersionError::ApprovedVersionLinkMissing(ref name)) if name == "trim_style"
    ));
    assert!(matches!(
        service.is_draft(&trim),
        Err(VersionError::ApprovedVersionLinkMissing(_))
    ));
    assert!(service.drafts_of(trim.id)?.is_empty());
    Ok(())
}

#[test]
fn unlinked_members_are_still_carried_through_publish() -> anyhow::Result<()> {
    let (_dir, service) = service("test_trim_styles.db")?;
    let room = service.create(Record::new("room").set("name", "Den"))?;
    service.create(Record::new("trim_style").set("style", "crown").set("room_id", room.id))?;

    let draft = service.get_or_create_draft(room.id)?;
    let mut trim = service.child(&draft, "trim_styles")?.context("draft trim")?;
    assert_eq!(trim.approved_version_id, None);
    trim.assign("style", "baseboard");
    service.save(&mut trim)?;

    let published = service.publish(room.id)?;

    let trims = service.children(&published, "trim_styles")?;
    assert_eq!(trims.len(), 1);
    assert_eq!(trims[0].text("style"), Some("baseboard"));
    Ok(())
}

struct LodgePolicy;

impl VersionPolicy for LodgePolicy {
    fn after_create_draft(&self, draft: &mut Record) -> anyhow::Result<()> {
        draft.assign("style", "Lodge");
        Ok(())
    }
}

#[test]
fn after_create_draft_hook_edits_the_new_draft() -> anyhow::Result<()> {
    let (_dir, service) = service_with(
        "test_after_create_hook.db",
        TypeConfig::new("house").policy(Arc::new(LodgePolicy)),
    )?;
    let House { house, .. } = ranch(&service)?;

    let draft = service.get_or_create_draft(house.id)?;

    assert_eq!(draft.text("style"), Some("Lodge"));
    assert_eq!(service.find(draft.id)?.text("style"), Some("Lodge"));
    assert_eq!(service.find(house.id)?.text("style"), Some("Ranch"));
    Ok(())
}

struct NoDraftsPolicy;

impl VersionPolicy for NoDraftsPolicy {
    fn after_create_draft(&self, _draft: &mut Record) -> anyhow::Result<()> {
        anyhow::bail!("house is locked for editing")
    }
}

#[test]
fn failing_after_create_draft_hook_creates_nothing() -> anyhow::Result<()> {
    let (_dir, service) = service_with(
        "test_after_create_hook_fails.db",
        TypeConfig::new("house").policy(Arc::new(NoDraftsPolicy)),
    )?;
    let House { house, .. } = ranch(&service)?;
    let records_before = service.store().len();

    let result = service.get_or_create_draft(house.id);

    match result {
        Err(VersionError::DraftCreation { approved, source }) => {
            assert_eq!(approved, house.id);
            assert!(matches!(
                *source,
                VersionError::Hook { hook: "after_create_draft", .. }
            ));
        }
        other => anyhow::bail!("expected a draft creation error, got {other:?}"),
    }
    assert_eq!(service.store().len(), records_before);
    assert!(service.drafts_of(house.id)?.is_empty());
    Ok(())
}

#[test]
fn failing_archive_rolls_the_publish_back() -> anyhow::Result<()> {
    init_tracing();
    let temp_dir = tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("test_archive_fails.db"))?);
    let service = VersionService::new(db.clone(), house_registry(TypeConfig::new("house")))?;
    let House { room, walk_in, .. } = ranch(&service)?;

    let mut draft = service.get_or_create_draft(room.id)?;
    draft.assign("name", "Parlor");
    service.save(&mut draft)?;
    // an unreadable member makes the snapshot of the room fail
    db.open_tree("records")?
        .insert(walk_in.id.as_bytes(), vec![0xff_u8])?;
    let records_before = service.store().len();

    let result = service.publish(room.id);

    assert!(matches!(
        result,
        Err(VersionError::HistoricVersionCreation { approved, .. }) if approved == room.id
    ));
    assert_eq!(service.find(room.id)?, room);
    assert_eq!(service.drafts_of(room.id)?, vec![draft]);
    assert!(service.previous_versions(room.id)?.is_empty());
    assert_eq!(service.store().len(), records_before);
    Ok(())
}

struct RejectingPolicy;

impl VersionPolicy for RejectingPolicy {
    fn before_publish(&self, _approved: &mut Record) -> anyhow::Result<()> {
        anyhow::bail!("inspection pending")
    }
}

#[test]
fn failing_before_publish_hook_rolls_everything_back() -> anyhow::Result<()> {
    let (_dir, service) = service_with(
        "test_before_publish_hook.db",
        TypeConfig::new("house").policy(Arc::new(RejectingPolicy)),
    )?;
    let House { house, room, .. } = ranch(&service)?;
    let mut draft = service.get_or_create_draft(house.id)?;
    draft.assign("style", "Victorian");
    service.save(&mut draft)?;
    let records_before = service.store().len();

    let result = service.publish(house.id);

    assert!(matches!(
        result,
        Err(VersionError::Hook { hook: "before_publish", .. })
    ));
    assert_eq!(service.find(house.id)?, house);
    assert_eq!(service.find(room.id)?, room);
    assert_eq!(service.drafts_of(house.id)?.len(), 1);
    assert_eq!(service.store().len(), records_before);
    Ok(())
}

struct NotifyFailsPolicy;

impl VersionPolicy for NotifyFailsPolicy {
    fn after_publish(&self, _approved: &Record) -> anyhow::Result<()> {
        anyhow::bail!("notification service unavailable")
    }
}

#[test]
fn failing_after_publish_hook_keeps_the_publish() -> anyhow::Result<()> {
    let (_dir, service) = service_with(
        "test_after_publish_hook.db",
        TypeConfig::new("house").policy(Arc::new(NotifyFailsPolicy)),
    )?;
    let House { house, .. } = ranch(&service)?;
    let mut draft = service.get_or_create_draft(house.id)?;
    draft.assign("style", "Victorian");
    service.save(&mut draft)?;

    let result = service.publish(house.id);

    assert!(matches!(
        result,
        Err(VersionError::Hook { hook: "after_publish", .. })
    ));
    assert_eq!(service.find(house.id)?.text("style"), Some("Victorian"));
    assert!(service.drafts_of(house.id)?.is_empty());
    Ok(())
}

#[test]
fn diff_classifies_changed_deleted_and_added_members() -> anyhow::Result<()> {
    let (_dir, service) = service("test_diff_statuses.db")?;
    let House { house, .. } = ranch(&service)?;

    let draft = service.get_or_create_draft(house.id)?;
    let draft_room = service.child(&draft, "rooms")?.context("draft room")?;
    let draft_closets = service.children(&draft_room, "closets")?;
    let find = |style: &str| {
        draft_closets
            .iter()
            .find(|closet| closet.text("style") == Some(style))
            .cloned()
            .context("draft closet")
    };

    let mut wall = find("wall")?;
    wall.assign("hidden", true);
    service.save(&mut wall)?;

    let mut walk_in = find("walk-in")?;
    walk_in.assign("room_id", Value::Null);
    service.save(&mut walk_in)?;

    service.create(
        Record::new("coat")
            .set("name", "Raincoat")
            .set("closet_id", wall.id),
    )?;

    let options = DiffOptions {
        include_associations: true,
        include_unchanged: true,
        ..service.diff_options()
    };
    let tree = service.diff(&house, &options)?;

    assert_eq!(tree.type_info.type_name, "house");
    assert_eq!(tree.status, EditableStatus::Unchanged);
    let room = &tree.members("rooms")[0];
    assert_eq!(room.status, EditableStatus::Unchanged);

    let wall_node = room
        .find_member("closets", "style", &Value::from("wall"))
        .context("wall node")?;
    assert_eq!(wall_node.status, EditableStatus::Changed);
    let hidden = wall_node.attribute("hidden").context("hidden diff")?;
    assert_eq!(hidden.live, Some(Value::Bool(false)));
    assert_eq!(hidden.editable, Some(Value::Bool(true)));

    let coat = &wall_node.members("coats")[0];
    assert_eq!(coat.status, EditableStatus::Added);
    assert_eq!(
        coat.attribute("name").and_then(|diff| diff.live.clone()),
        None
    );

    let walk_in_node = room
        .find_member("closets", "style", &Value::from("walk-in"))
        .context("walk-in node")?;
    assert_eq!(walk_in_node.status, EditableStatus::Deleted);
    assert!(walk_in_node.attribute("room_id").is_none());

    // without unchanged entries only the path to the changes remains
    let options = DiffOptions {
        include_associations: true,
        ..service.diff_options()
    };
    let tree = service.diff(&house, &options)?;
    let closets = tree.members("rooms")[0].members("closets");
    let mut statuses: Vec<_> = closets.iter().map(|node| node.status).collect();
    statuses.sort_by_key(|status| format!("{status:?}"));
    assert_eq!(
        statuses,
        vec![EditableStatus::Changed, EditableStatus::Deleted]
    );
    Ok(())
}

#[test]
fn diff_renders_text_changes_and_creates_draft_once() -> anyhow::Result<()> {
    let (_dir, service) = service("test_diff_text.db")?;
    let House { house, .. } = ranch(&service)?;

    let options = DiffOptions {
        include_text_diff: true,
        ..service.diff_options()
    };
    // the first diff creates the draft
    let empty = service.diff(&house, &options)?;
    assert_eq!(service.drafts_of(house.id)?.len(), 1);
    assert_eq!(empty.status, EditableStatus::Unchanged);
    assert!(empty.associations.is_empty());

    let mut draft = service.editable_version(&house)?;
    draft.assign("style", "Victorian");
    service.save(&mut draft)?;

    let first = service.diff(&house, &options)?;
    let second = service.diff(&draft, &options)?;

    assert_eq!(first, second);
    assert_eq!(service.drafts_of(house.id)?.len(), 1);
    assert_eq!(first.status, EditableStatus::Changed);
    let style = first.attribute("style").context("style diff")?;
    assert_eq!(
        style.diff.as_deref(),
        Some("<del class=\"differ\">Ranch</del><ins class=\"differ\">Victorian</ins>")
    );
    assert_eq!(service.diff_options().text_format, TextFormat::Html);
    Ok(())
}

#[test]
fn diff_pair_never_creates_drafts() -> anyhow::Result<()> {
    let (_dir, service) = service("test_diff_pair.db")?;
    let House { house, room, walk_in, wall } = ranch(&service)?;

    let node = service.diff_pair(&walk_in, &wall, &DiffOptions::default())?;

    assert_eq!(node.status, EditableStatus::Changed);
    assert!(node.attribute("style").is_some());
    assert!(node.attribute("hidden").is_none());
    assert!(service.drafts_of(house.id)?.is_empty());
    assert!(service.drafts_of(room.id)?.is_empty());
    Ok(())
}

#[test]
fn deleting_a_house_removes_its_members_but_not_history() -> anyhow::Result<()> {
    let (_dir, service) = service("test_delete_cascade.db")?;
    let House { house, room, .. } = ranch(&service)?;

    let mut draft_room = service.get_or_create_draft(room.id)?;
    draft_room.assign("name", "Parlor");
    service.save(&mut draft_room)?;
    service.publish(room.id)?;
    assert_eq!(historic_count(&service, "room")?, 1);

    service.get_or_create_draft(house.id)?;
    assert!(service.delete(house.id)?);

    assert!(service.all_of_type("house")?.is_empty());
    let rooms = service.all_of_type("room")?;
    assert_eq!(rooms.len(), 1);
    assert!(rooms[0].is_historic());
    assert!(!service.delete(house.id)?);
    Ok(())
}
