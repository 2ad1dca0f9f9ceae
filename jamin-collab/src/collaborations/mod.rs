use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    CollabContext, Database, DatabaseError, LayerJoinRow, PrimaryKey, Storage, ThemeData,
    ThemeRole,
};

/// A member that contributed to a collaboration, either with the original
/// theme or with a layer
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: PrimaryKey,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// A derived, point-in-time view of a collaboration: the root theme plus the
/// layers that existed up to (and including) the identifying layer. Never
/// persisted, always rebuilt from the layer rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CollabSnapshot {
    pub root: ThemeData,
    /// The cumulative layer prefix in chronological order, never empty
    pub layers: Vec<ThemeData>,
    /// Contributing members, deduplicated, in first-seen order
    pub participants: Vec<Participant>,
}

impl CollabSnapshot {
    /// The layer this snapshot was taken at doubles as its identity
    pub fn id(&self) -> PrimaryKey {
        self.latest().id
    }

    /// The most recent layer in the prefix, which carries the snapshot's
    /// display fields
    pub fn latest(&self) -> &ThemeData {
        self.layers
            .last()
            .expect("snapshot contains at least one layer")
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.latest().created_at
    }
}

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("No collaboration exists for layer {0}")]
    NotFound(PrimaryKey),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// Builds the collaboration timeline from the flat theme/layer table
pub struct CollabManager<Db, St> {
    context: CollabContext<Db, St>,
    cache: Mutex<Option<Vec<CollabSnapshot>>>,
}

impl<Db, St> CollabManager<Db, St>
where
    Db: Database,
    St: Storage,
{
    pub fn new(context: &CollabContext<Db, St>) -> Self {
        Self {
            context: context.clone(),
            cache: Mutex::new(None),
        }
    }

    /// Drops the cached timeline so the next read recomputes it. Called when
    /// a layer or theme changes.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    /// Returns every collaboration snapshot, most recently modified first
    pub async fn list(&self) -> Result<Vec<CollabSnapshot>, DatabaseError> {
        if let Some(cached) = self.cache.lock().clone() {
            return Ok(cached);
        }

        let rows = self.context.database.list_layer_rows(None).await?;
        let timeline = build_timeline(rows);

        *self.cache.lock() = Some(timeline.clone());

        Ok(timeline)
    }

    /// Looks up the snapshot identified by `layer_id`. Only the collaboration
    /// that layer belongs to is aggregated, the other groups are never built.
    pub async fn by_layer_id(&self, layer_id: PrimaryKey) -> Result<CollabSnapshot, CollabError> {
        let layer = self
            .context
            .database
            .theme_by_id(layer_id)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => CollabError::NotFound(layer_id),
                e => CollabError::Db(e),
            })?;

        let parent_id = match layer.role {
            ThemeRole::Layer { parent_id } => parent_id,
            ThemeRole::Original => return Err(CollabError::NotFound(layer_id)),
        };

        let rows = self.context.database.list_layer_rows(Some(parent_id)).await?;

        build_timeline(rows)
            .into_iter()
            .find(|snapshot| snapshot.id() == layer_id)
            .ok_or(CollabError::NotFound(layer_id))
    }
}

/// Turns the flat layer rows into the full snapshot timeline.
///
/// For every root with L layers this produces exactly L snapshots, one per
/// cumulative state of the collaboration. Deterministic regardless of the
/// input row order.
pub fn build_timeline(rows: Vec<LayerJoinRow>) -> Vec<CollabSnapshot> {
    let mut groups: BTreeMap<PrimaryKey, Vec<LayerJoinRow>> = BTreeMap::new();

    for row in rows {
        groups.entry(row.parent.id).or_default().push(row);
    }

    let mut snapshots = Vec::new();

    for (_, mut group) in groups {
        // Chronological layering order, creation-date ties fall back to ids
        group.sort_by(|a, b| {
            a.layer
                .created_at
                .cmp(&b.layer.created_at)
                .then(a.layer.id.cmp(&b.layer.id))
        });

        let root = group[0].parent.clone();
        let layers: Vec<ThemeData> = group.into_iter().map(|row| row.layer).collect();

        for end in 1..=layers.len() {
            let prefix = layers[..end].to_vec();
            let participants = collect_participants(&root, &prefix);

            snapshots.push(CollabSnapshot {
                root: root.clone(),
                layers: prefix,
                participants,
            });
        }
    }

    // Most recently modified collaboration first
    snapshots.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then(b.id().cmp(&a.id()))
    });

    snapshots
}

fn collect_participants(root: &ThemeData, layers: &[ThemeData]) -> Vec<Participant> {
    let mut participants: Vec<Participant> = Vec::new();

    let contributors =
        std::iter::once(&root.creator).chain(layers.iter().map(|layer| &layer.creator));

    for member in contributors {
        if participants.iter().all(|p| p.id != member.id) {
            participants.push(Participant {
                id: member.id,
                display_name: member.display_name.clone(),
                avatar_url: member.avatar_url.clone(),
            });
        }
    }

    participants
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};

    use super::{build_timeline, CollabError, CollabManager};
    use crate::{
        events, CollabContext, Database, LayerJoinRow, MediaPayload, MemberData, MemoryDatabase,
        MemoryStorage, NewMember, PrimaryKey, ThemeData, ThemeManager, ThemeRole, ThemeStatus,
        ThemeSubmission,
    };

    fn member(id: PrimaryKey, name: &str) -> MemberData {
        MemberData {
            id,
            username: name.to_lowercase(),
            email: format!("{}@example.com", name.to_lowercase()),
            password: "irrelevant".to_string(),
            display_name: name.to_string(),
            avatar_url: None,
            first_name: None,
            last_name: None,
            country: None,
            instrument: None,
        }
    }

    fn theme(
        id: PrimaryKey,
        creator: &MemberData,
        role: ThemeRole,
        created_at: DateTime<Utc>,
    ) -> ThemeData {
        ThemeData {
            id,
            creator: creator.clone(),
            title: format!("Theme {id}"),
            description: None,
            genre: None,
            key_signature: None,
            mode: None,
            chords: None,
            scale: None,
            tempo: Some(120),
            duration_seconds: 30,
            recording_url: format!("memory://themes/{id}.wav"),
            instrument: Some("guitar".to_string()),
            status: ThemeStatus::Complete,
            role,
            created_at,
        }
    }

    fn day(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
    }

    fn layer_row(
        id: PrimaryKey,
        parent: &ThemeData,
        creator: &MemberData,
        created_at: DateTime<Utc>,
    ) -> LayerJoinRow {
        LayerJoinRow {
            layer: theme(
                id,
                creator,
                ThemeRole::Layer {
                    parent_id: parent.id,
                },
                created_at,
            ),
            parent: parent.clone(),
        }
    }

    #[test]
    fn every_layer_produces_one_cumulative_snapshot() {
        let alice = member(1, "Alice");
        let bob = member(2, "Bob");
        let carol = member(3, "Carol");

        let root = theme(10, &alice, ThemeRole::Original, day(1));
        let rows = vec![
            layer_row(11, &root, &bob, day(2)),
            layer_row(12, &root, &carol, day(3)),
            layer_row(13, &root, &bob, day(4)),
        ];

        let timeline = build_timeline(rows);
        assert_eq!(timeline.len(), 3);

        // Newest snapshot first, each one a prefix of the next
        let newest = &timeline[0];
        assert_eq!(newest.id(), 13);
        assert_eq!(
            newest.layers.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![11, 12, 13]
        );

        let middle = &timeline[1];
        assert_eq!(middle.id(), 12);
        assert_eq!(
            middle.layers.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![11, 12]
        );

        let oldest = &timeline[2];
        assert_eq!(oldest.id(), 11);
        assert_eq!(oldest.layers.iter().map(|l| l.id).collect::<Vec<_>>(), vec![11]);

        // Participants accumulate and deduplicate in first-seen order
        assert_eq!(
            oldest.participants.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            newest.participants.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn snapshots_are_sorted_by_their_own_date_descending() {
        let alice = member(1, "Alice");
        let bob = member(2, "Bob");

        let first_root = theme(10, &alice, ThemeRole::Original, day(1));
        let second_root = theme(20, &bob, ThemeRole::Original, day(1));

        let rows = vec![
            layer_row(11, &first_root, &bob, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            layer_row(21, &second_root, &alice, Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()),
            layer_row(12, &first_root, &bob, Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()),
        ];

        let dates: Vec<_> = build_timeline(rows)
            .iter()
            .map(|snapshot| snapshot.created_at())
            .collect();

        assert_eq!(
            dates,
            vec![
                Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ]
        );
    }

    #[test]
    fn creation_date_ties_break_on_id() {
        let alice = member(1, "Alice");
        let bob = member(2, "Bob");

        let root = theme(10, &alice, ThemeRole::Original, day(1));
        let rows = vec![
            layer_row(12, &root, &bob, day(2)),
            layer_row(11, &root, &bob, day(2)),
        ];

        let timeline = build_timeline(rows);

        assert_eq!(
            timeline[1].layers.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![11]
        );
        assert_eq!(
            timeline[0].layers.iter().map(|l| l.id).collect::<Vec<_>>(),
            vec![11, 12]
        );
    }

    struct Setup {
        themes: ThemeManager<MemoryDatabase, MemoryStorage>,
        collaborations: CollabManager<MemoryDatabase, MemoryStorage>,
    }

    async fn setup() -> (Setup, MemberData) {
        let database = Arc::new(MemoryDatabase::new());
        let storage = Arc::new(MemoryStorage::new());
        let (sender, _receiver) = events::channel();

        let context = CollabContext {
            database: database.clone(),
            storage,
            events: sender,
        };

        let member = database
            .create_member(NewMember {
                username: "ada".to_string(),
                email: "ada@example.com".to_string(),
                password: "irrelevant".to_string(),
                display_name: "Ada".to_string(),
            })
            .await
            .unwrap();

        let setup = Setup {
            themes: ThemeManager::new(&context),
            collaborations: CollabManager::new(&context),
        };

        (setup, member)
    }

    fn submission(title: &str) -> ThemeSubmission {
        ThemeSubmission {
            title: title.to_string(),
            instrument: Some("guitar".to_string()),
            duration_seconds: 30,
            recording: Some(MediaPayload::Bytes(vec![1, 2, 3, 4])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn by_layer_id_reads_are_idempotent() {
        let (setup, member) = setup().await;

        let root = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();
        let layer = setup
            .themes
            .create_layer(&member, root.id, submission("Bass line"))
            .await
            .unwrap();

        let first = setup.collaborations.by_layer_id(layer.id).await.unwrap();
        let second = setup.collaborations.by_layer_id(layer.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.root.id, root.id);
        assert_eq!(first.id(), layer.id);
    }

    #[tokio::test]
    async fn original_themes_do_not_identify_snapshots() {
        let (setup, member) = setup().await;

        let root = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();

        let result = setup.collaborations.by_layer_id(root.id).await;
        assert!(matches!(result, Err(CollabError::NotFound(_))));
    }

    #[tokio::test]
    async fn the_timeline_is_cached_until_invalidated() {
        let (setup, member) = setup().await;

        let root = setup
            .themes
            .create_theme(&member, submission("First light"))
            .await
            .unwrap();
        setup
            .themes
            .create_layer(&member, root.id, submission("Bass line"))
            .await
            .unwrap();

        assert_eq!(setup.collaborations.list().await.unwrap().len(), 1);

        // A write that bypasses the event loop is invisible to the cache
        setup
            .themes
            .create_layer(&member, root.id, submission("Overdub"))
            .await
            .unwrap();
        assert_eq!(setup.collaborations.list().await.unwrap().len(), 1);

        setup.collaborations.invalidate();
        assert_eq!(setup.collaborations.list().await.unwrap().len(), 2);
    }
}
