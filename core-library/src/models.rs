//! Domain models for smart playlists
//!
//! Tracks are flat records fetched from the remote library. Playlists own a
//! rule tree that selects tracks, a sort specification and an optional
//! limit. Everything here is plain data plus validation; evaluation lives in
//! [`crate::rules`] and [`crate::query`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the virtual field matching membership in another playlist.
pub const PLAYLIST_FIELD: &str = "playlist";

/// Pseudo sort key producing a stable, session-random order.
pub const RANDOM_SORT: &str = "random";

// =============================================================================
// Track
// =============================================================================

/// Library track as delivered by the remote delta feed.
///
/// Datetime fields are microseconds since the Unix epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Track {
    pub id: String,

    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub composer: String,
    pub genre: String,
    pub comment: String,
    pub store_id: String,
    pub album_id: String,
    pub artist_id: String,
    pub content_type: String,

    pub year: i64,
    pub track_number: i64,
    pub disc_number: i64,
    pub total_track_count: i64,
    pub total_disc_count: i64,
    pub duration_millis: i64,
    pub play_count: i64,
    pub rating: i64,
    pub beats_per_minute: i64,
    pub estimated_size: i64,
    pub explicit_type: i64,

    pub creation_timestamp: i64,
    pub last_modified_timestamp: i64,
    pub recent_timestamp: i64,
    pub last_played: i64,
}

impl Track {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// String value of `field`, or `""` for non-string fields.
    pub fn text(&self, field: TrackField) -> &str {
        use TrackField::*;
        match field {
            Id => &self.id,
            Title => &self.title,
            Artist => &self.artist,
            Album => &self.album,
            AlbumArtist => &self.album_artist,
            Composer => &self.composer,
            Genre => &self.genre,
            Comment => &self.comment,
            StoreId => &self.store_id,
            AlbumId => &self.album_id,
            ArtistId => &self.artist_id,
            ContentType => &self.content_type,
            _ => "",
        }
    }

    /// Integer value of a numeric or datetime `field`, or `0` otherwise.
    pub fn number(&self, field: TrackField) -> i64 {
        use TrackField::*;
        match field {
            Year => self.year,
            TrackNumber => self.track_number,
            DiscNumber => self.disc_number,
            TotalTrackCount => self.total_track_count,
            TotalDiscCount => self.total_disc_count,
            DurationMillis => self.duration_millis,
            PlayCount => self.play_count,
            Rating => self.rating,
            BeatsPerMinute => self.beats_per_minute,
            EstimatedSize => self.estimated_size,
            ExplicitType => self.explicit_type,
            CreationTimestamp => self.creation_timestamp,
            LastModifiedTimestamp => self.last_modified_timestamp,
            RecentTimestamp => self.recent_timestamp,
            LastPlayed => self.last_played,
            _ => 0,
        }
    }
}

/// Type of a rule field. Decides which operators apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Numeric,
    String,
    Datetime,
    /// Membership in another playlist
    Playlist,
}

/// Addressable track field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackField {
    Id,
    Title,
    Artist,
    Album,
    AlbumArtist,
    Composer,
    Genre,
    Comment,
    StoreId,
    AlbumId,
    ArtistId,
    ContentType,
    Year,
    TrackNumber,
    DiscNumber,
    TotalTrackCount,
    TotalDiscCount,
    DurationMillis,
    PlayCount,
    Rating,
    BeatsPerMinute,
    EstimatedSize,
    ExplicitType,
    CreationTimestamp,
    LastModifiedTimestamp,
    RecentTimestamp,
    LastPlayed,
}

impl TrackField {
    pub const ALL: [TrackField; 27] = [
        TrackField::Id,
        TrackField::Title,
        TrackField::Artist,
        TrackField::Album,
        TrackField::AlbumArtist,
        TrackField::Composer,
        TrackField::Genre,
        TrackField::Comment,
        TrackField::StoreId,
        TrackField::AlbumId,
        TrackField::ArtistId,
        TrackField::ContentType,
        TrackField::Year,
        TrackField::TrackNumber,
        TrackField::DiscNumber,
        TrackField::TotalTrackCount,
        TrackField::TotalDiscCount,
        TrackField::DurationMillis,
        TrackField::PlayCount,
        TrackField::Rating,
        TrackField::BeatsPerMinute,
        TrackField::EstimatedSize,
        TrackField::ExplicitType,
        TrackField::CreationTimestamp,
        TrackField::LastModifiedTimestamp,
        TrackField::RecentTimestamp,
        TrackField::LastPlayed,
    ];

    /// Wire name, as used in rules and sorts.
    pub fn name(self) -> &'static str {
        use TrackField::*;
        match self {
            Id => "id",
            Title => "title",
            Artist => "artist",
            Album => "album",
            AlbumArtist => "albumArtist",
            Composer => "composer",
            Genre => "genre",
            Comment => "comment",
            StoreId => "storeId",
            AlbumId => "albumId",
            ArtistId => "artistId",
            ContentType => "contentType",
            Year => "year",
            TrackNumber => "trackNumber",
            DiscNumber => "discNumber",
            TotalTrackCount => "totalTrackCount",
            TotalDiscCount => "totalDiscCount",
            DurationMillis => "durationMillis",
            PlayCount => "playCount",
            Rating => "rating",
            BeatsPerMinute => "beatsPerMinute",
            EstimatedSize => "estimatedSize",
            ExplicitType => "explicitType",
            CreationTimestamp => "creationTimestamp",
            LastModifiedTimestamp => "lastModifiedTimestamp",
            RecentTimestamp => "recentTimestamp",
            LastPlayed => "lastPlayed",
        }
    }

    pub fn kind(self) -> FieldKind {
        use TrackField::*;
        match self {
            Id | Title | Artist | Album | AlbumArtist | Composer | Genre | Comment | StoreId
            | AlbumId | ArtistId | ContentType => FieldKind::String,
            CreationTimestamp | LastModifiedTimestamp | RecentTimestamp | LastPlayed => {
                FieldKind::Datetime
            }
            _ => FieldKind::Numeric,
        }
    }
}

impl FromStr for TrackField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("Unknown track field: {}", s))
    }
}

impl fmt::Display for TrackField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of any rule field name, including the virtual `playlist` field.
pub fn field_kind(name: &str) -> Option<FieldKind> {
    if name == PLAYLIST_FIELD {
        return Some(FieldKind::Playlist);
    }
    name.parse::<TrackField>().ok().map(TrackField::kind)
}

// =============================================================================
// Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    NotContains,
    EqIgnoreCase,
    NeqIgnoreCase,
    ContainsIgnoreCase,
    NotContainsIgnoreCase,
    Before,
    After,
}

impl Operator {
    /// Whether this operator may be applied to a field of `kind`.
    pub fn applies_to(self, kind: FieldKind) -> bool {
        use Operator::*;
        match kind {
            FieldKind::Numeric => matches!(self, Eq | Neq | Lt | Lte | Gt | Gte),
            FieldKind::String => matches!(
                self,
                Eq | Neq
                    | Contains
                    | NotContains
                    | EqIgnoreCase
                    | NeqIgnoreCase
                    | ContainsIgnoreCase
                    | NotContainsIgnoreCase
            ),
            FieldKind::Datetime => matches!(self, Before | After),
            FieldKind::Playlist => matches!(self, Eq | Neq),
        }
    }

    fn phrase(self) -> &'static str {
        use Operator::*;
        match self {
            Eq => "is",
            Neq => "is not",
            Lt => "<",
            Lte => "<=",
            Gt => ">",
            Gte => ">=",
            Contains => "contains",
            NotContains => "does not contain",
            EqIgnoreCase => "is (any case)",
            NeqIgnoreCase => "is not (any case)",
            ContainsIgnoreCase => "contains (any case)",
            NotContainsIgnoreCase => "does not contain (any case)",
            Before => "before",
            After => "after",
        }
    }
}

/// Literal on the right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleValue::Number(n) => write!(f, "{}", n),
            RuleValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Leaf of a rule tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    pub operator: Operator,
    pub value: RuleValue,
}

impl Condition {
    pub fn new(name: impl Into<String>, operator: Operator, value: RuleValue) -> Self {
        Self {
            name: name.into(),
            operator,
            value,
        }
    }

    /// Playlist referenced by a `playlist` leaf.
    pub fn playlist_ref(&self) -> Option<PlaylistRef> {
        if self.name != PLAYLIST_FIELD {
            return None;
        }
        match &self.value {
            RuleValue::Text(text) => text.parse().ok(),
            RuleValue::Number(_) => None,
        }
    }
}

/// Boolean rule tree.
///
/// Serialized as `{"all": [...]}`, `{"any": [...]}` or a bare
/// `{"name", "operator", "value"}` leaf. An empty `all`/`any` matches every
/// track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Rule {
    All { all: Vec<Rule> },
    Any { any: Vec<Rule> },
    Condition(Condition),
}

impl Default for Rule {
    fn default() -> Self {
        Rule::All { all: Vec::new() }
    }
}

impl Rule {
    pub fn all(rules: Vec<Rule>) -> Self {
        Rule::All { all: rules }
    }

    pub fn any(rules: Vec<Rule>) -> Self {
        Rule::Any { any: rules }
    }

    pub fn condition(name: impl Into<String>, operator: Operator, value: RuleValue) -> Self {
        Rule::Condition(Condition::new(name, operator, value))
    }

    /// Check every leaf references a known field with an operator valid for it.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Rule::All { all: children } | Rule::Any { any: children } => {
                children.iter().try_for_each(Rule::validate)
            }
            Rule::Condition(condition) => {
                let kind = field_kind(&condition.name)
                    .ok_or_else(|| format!("Unknown rule field: {}", condition.name))?;
                if !condition.operator.applies_to(kind) {
                    return Err(format!(
                        "Operator {:?} is not valid for {:?} field {}",
                        condition.operator, kind, condition.name
                    ));
                }
                if kind == FieldKind::Playlist && condition.playlist_ref().is_none() {
                    return Err(format!(
                        "Playlist rule value must be local:<id> or remote:<id>, got {}",
                        condition.value
                    ));
                }
                Ok(())
            }
        }
    }

    /// Every playlist referenced anywhere in the tree.
    pub fn references(&self) -> Vec<PlaylistRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<PlaylistRef>) {
        match self {
            Rule::All { all: children } | Rule::Any { any: children } => {
                for child in children {
                    child.collect_references(out);
                }
            }
            Rule::Condition(condition) => {
                if let Some(reference) = condition.playlist_ref() {
                    if !out.contains(&reference) {
                        out.push(reference);
                    }
                }
            }
        }
    }

    /// Copy of the tree with every leaf referencing a playlist matched by
    /// `is_gone` removed. Returns `None` when nothing was removed.
    ///
    /// A removed root leaf becomes an empty `all`.
    pub fn without_references<F>(&self, is_gone: &F) -> Option<Rule>
    where
        F: Fn(&PlaylistRef) -> bool,
    {
        match self {
            Rule::Condition(condition) => condition
                .playlist_ref()
                .filter(|reference| is_gone(reference))
                .map(|_| Rule::default()),
            Rule::All { all: children } => {
                Self::prune_children(children, is_gone).map(|all| Rule::All { all })
            }
            Rule::Any { any: children } => {
                Self::prune_children(children, is_gone).map(|any| Rule::Any { any })
            }
        }
    }

    fn prune_children<F>(children: &[Rule], is_gone: &F) -> Option<Vec<Rule>>
    where
        F: Fn(&PlaylistRef) -> bool,
    {
        let mut changed = false;
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Rule::Condition(condition)
                    if condition.playlist_ref().is_some_and(|r| is_gone(&r)) =>
                {
                    changed = true;
                }
                _ => match child.without_references(is_gone) {
                    Some(pruned) => {
                        changed = true;
                        kept.push(pruned);
                    }
                    None => kept.push(child.clone()),
                },
            }
        }
        changed.then_some(kept)
    }

    /// Human-readable summary, used as the remote playlist description.
    pub fn describe(&self) -> String {
        match self {
            Rule::All { all } if all.is_empty() => "all tracks".to_string(),
            Rule::Any { any } if any.is_empty() => "all tracks".to_string(),
            _ => self.describe_nested(false),
        }
    }

    fn describe_nested(&self, parenthesize: bool) -> String {
        let (children, joiner) = match self {
            Rule::Condition(c) => {
                return format!("{} {} {}", c.name, c.operator.phrase(), c.value);
            }
            Rule::All { all } => (all, " and "),
            Rule::Any { any } => (any, " or "),
        };
        if children.is_empty() {
            return "any track".to_string();
        }
        let inner = children
            .iter()
            .map(|child| child.describe_nested(true))
            .collect::<Vec<_>>()
            .join(joiner);
        if parenthesize && children.len() > 1 {
            format!("({})", inner)
        } else {
            inner
        }
    }
}

// =============================================================================
// Playlists
// =============================================================================

/// Reference to a playlist from a `playlist` rule.
///
/// Serialized as `local:<localId>` (another smart playlist of the same user)
/// or `remote:<remoteId>` (a plain remote playlist).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PlaylistRef {
    Local(String),
    Remote(String),
}

impl FromStr for PlaylistRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("local:").filter(|id| !id.is_empty()) {
            Ok(PlaylistRef::Local(id.to_string()))
        } else if let Some(id) = s.strip_prefix("remote:").filter(|id| !id.is_empty()) {
            Ok(PlaylistRef::Remote(id.to_string()))
        } else {
            Err(format!("Invalid playlist reference: {}", s))
        }
    }
}

impl fmt::Display for PlaylistRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistRef::Local(id) => write!(f, "local:{}", id),
            PlaylistRef::Remote(id) => write!(f, "remote:{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    /// Track field name or `random`
    pub sort_by: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(sort_by: impl Into<String>) -> Self {
        Self {
            sort_by: sort_by.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(sort_by: impl Into<String>) -> Self {
        Self {
            sort_by: sort_by.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Rule-based playlist owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    /// Assigned at creation, never changes
    pub local_id: String,
    /// Set once the remote copy exists, never changes afterwards
    pub remote_id: Option<String>,
    pub title: String,
    pub rules: Rule,
    #[serde(default)]
    pub sorts: Vec<SortSpec>,
    pub limit: Option<u32>,
    pub user_id: String,
}

impl Playlist {
    pub fn new(
        user_id: impl Into<String>,
        local_id: impl Into<String>,
        title: impl Into<String>,
        rules: Rule,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: None,
            title: title.into(),
            rules,
            sorts: Vec::new(),
            limit: None,
            user_id: user_id.into(),
        }
    }

    pub fn with_sorts(mut self, sorts: Vec<SortSpec>) -> Self {
        self.sorts = sorts;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    /// Number of tracks the playlist may hold: `min(limit, max_entries)`.
    pub fn effective_limit(&self, max_entries: usize) -> usize {
        self.limit
            .map_or(max_entries, |limit| (limit as usize).min(max_entries))
    }

    /// True when anything that influences the remote copy differs.
    ///
    /// Filling in `remote_id` alone does not count.
    pub fn sync_relevant_change(&self, other: &Playlist) -> bool {
        self.title != other.title
            || self.rules != other.rules
            || self.sorts != other.sorts
            || self.limit != other.limit
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("Playlist user id cannot be empty".to_string());
        }

        if self.local_id.trim().is_empty() {
            return Err("Playlist local id cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Playlist title cannot be empty".to_string());
        }

        if self.limit == Some(0) {
            return Err("Playlist limit must be positive".to_string());
        }

        for sort in &self.sorts {
            if sort.sort_by != RANDOM_SORT && sort.sort_by.parse::<TrackField>().is_err() {
                return Err(format!("Unknown sort field: {}", sort.sort_by));
            }
        }

        if self.rules.references().contains(&PlaylistRef::Local(self.local_id.clone())) {
            return Err("Playlist rules cannot reference the playlist itself".to_string());
        }

        self.rules.validate()
    }
}
