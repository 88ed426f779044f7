use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    ChatRoom, ChatRoomStore, Message, MessageContent, MessageId, MessageStore, MessageType,
    MessageWithSender, ReadReceipt, ReadReceiptStore, RepositoryError, RepositoryResult, RoomId,
    RoomMembership, RoomSummary, RoomType, SenderProfile, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // foreign_key_violation: 引用的消息或房间不存在
            Some("23503") => RepositoryError::NotFound,
            Some("23505") => RepositoryError::conflict(db.message().to_string()),
            _ => RepositoryError::storage(err.to_string()),
        },
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    room_type: String,
    pitch_id: Option<Uuid>,
    participants: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoomRecord> for ChatRoom {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let room_type =
            RoomType::parse(&value.room_type).map_err(|err| invalid_data(err.to_string()))?;

        Ok(ChatRoom {
            id: RoomId::from(value.id),
            room_type,
            pitch_id: value.pitch_id.map(Into::into),
            participants: value.participants.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    room_id: Uuid,
    sender_id: Uuid,
    content: String,
    message_type: String,
    created_at: DateTime<Utc>,
    sender_email: String,
    sender_first_name: String,
    sender_last_name: String,
}

impl TryFrom<MessageRecord> for MessageWithSender {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let message_type = MessageType::parse(&value.message_type)
            .map_err(|err| invalid_data(err.to_string()))?;
        let sender_id = UserId::from(value.sender_id);

        Ok(MessageWithSender {
            message: Message::new(
                MessageId::from(value.id),
                RoomId::from(value.room_id),
                sender_id,
                content,
                message_type,
                value.created_at,
            ),
            sender: SenderProfile {
                id: sender_id,
                email: value.sender_email,
                first_name: value.sender_first_name,
                last_name: value.sender_last_name,
            },
        })
    }
}

#[derive(Debug, FromRow)]
struct ReceiptRecord {
    message_id: Uuid,
    user_id: Uuid,
    read_at: DateTime<Utc>,
}

impl From<ReceiptRecord> for ReadReceipt {
    fn from(value: ReceiptRecord) -> Self {
        ReadReceipt::new(
            MessageId::from(value.message_id),
            UserId::from(value.user_id),
            value.read_at,
        )
    }
}

async fn fetch_room<'e, E>(executor: E, room_id: Uuid) -> RepositoryResult<Option<ChatRoom>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let record = sqlx::query_as::<_, RoomRecord>(
        r#"
        SELECT r.id, r.room_type, r.pitch_id, r.created_at, r.updated_at,
               COALESCE(
                   array_agg(p.user_id ORDER BY p.joined_at, p.user_id)
                       FILTER (WHERE p.user_id IS NOT NULL),
                   '{}'::uuid[]
               ) AS participants
        FROM chat_rooms r
        LEFT JOIN chat_room_participants p ON p.room_id = r.id
        WHERE r.id = $1
        GROUP BY r.id
        "#,
    )
    .bind(room_id)
    .fetch_optional(executor)
    .await
    .map_err(map_sqlx_err)?;

    record.map(ChatRoom::try_from).transpose()
}

async fn insert_room(tx: &mut Transaction<'_, Postgres>, room: &ChatRoom) -> RepositoryResult<()> {
    sqlx::query(
        r#"
        INSERT INTO chat_rooms (id, room_type, pitch_id, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::from(room.id))
    .bind(room.room_type.as_str())
    .bind(room.pitch_id.map(Uuid::from))
    .bind(room.created_at)
    .bind(room.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;

    let participants: Vec<Uuid> = room.participants.iter().copied().map(Uuid::from).collect();
    sqlx::query(
        r#"
        INSERT INTO chat_room_participants (room_id, user_id, joined_at)
        SELECT $1, UNNEST($2::uuid[]), $3
        "#,
    )
    .bind(Uuid::from(room.id))
    .bind(participants)
    .bind(room.created_at)
    .execute(&mut **tx)
    .await
    .map_err(map_sqlx_err)?;

    Ok(())
}

async fn fetch_messages(
    pool: &PgPool,
    room_id: RoomId,
    offset: u64,
    limit: u32,
) -> RepositoryResult<Vec<MessageWithSender>> {
    let records = sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT m.id, m.room_id, m.sender_id, m.content, m.message_type, m.created_at,
               COALESCE(u.email, '') AS sender_email,
               COALESCE(u.first_name, '') AS sender_first_name,
               COALESCE(u.last_name, '') AS sender_last_name
        FROM messages m
        LEFT JOIN users u ON u.id = m.sender_id
        WHERE m.room_id = $1
        ORDER BY m.created_at DESC, m.id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(Uuid::from(room_id))
    .bind(i64::from(limit))
    .bind(i64::try_from(offset).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_err)?;

    records.into_iter().map(MessageWithSender::try_from).collect()
}

async fn count_room_messages(pool: &PgPool, room_id: RoomId) -> RepositoryResult<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE room_id = $1")
        .bind(Uuid::from(room_id))
        .fetch_one(pool)
        .await
        .map_err(map_sqlx_err)?;

    Ok(count.max(0) as u64)
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRoomStore for PgChatRoomRepository {
    async fn create_room(&self, room: ChatRoom) -> RepositoryResult<ChatRoom> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        insert_room(&mut tx, &room).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn find_or_create_direct_room(&self, candidate: ChatRoom) -> RepositoryResult<ChatRoom> {
        let (first, second) = match candidate.participants.as_slice() {
            [first, second] => (*first, *second),
            _ => {
                return Err(RepositoryError::conflict(
                    "direct room needs exactly two participants",
                ))
            }
        };
        let (low, high) = if first <= second {
            (first, second)
        } else {
            (second, first)
        };

        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 同一对用户的并发创建在事务锁上串行化
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("direct-room:{low}:{high}"))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        let existing: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT p.room_id
            FROM chat_room_participants p
            JOIN chat_rooms r ON r.id = p.room_id
            WHERE r.room_type = 'DIRECT'
            GROUP BY p.room_id
            HAVING COUNT(*) = 2 AND bool_and(p.user_id = ANY($1))
            LIMIT 1
            "#,
        )
        .bind(vec![Uuid::from(low), Uuid::from(high)])
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let room = match existing {
            Some(room_id) => fetch_room(&mut *tx, room_id)
                .await?
                .ok_or(RepositoryError::NotFound)?,
            None => {
                insert_room(&mut tx, &candidate).await?;
                candidate
            }
        };

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn find_room(&self, room_id: RoomId) -> RepositoryResult<Option<ChatRoom>> {
        fetch_room(&self.pool, Uuid::from(room_id)).await
    }

    async fn list_rooms_for_user(&self, user_id: UserId) -> RepositoryResult<Vec<RoomSummary>> {
        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT r.id, r.room_type, r.pitch_id, r.created_at, r.updated_at,
                   COALESCE(
                       array_agg(p.user_id ORDER BY p.joined_at, p.user_id)
                           FILTER (WHERE p.user_id IS NOT NULL),
                       '{}'::uuid[]
                   ) AS participants
            FROM chat_rooms r
            LEFT JOIN chat_room_participants p ON p.room_id = r.id
            WHERE EXISTS (
                SELECT 1 FROM chat_room_participants me
                WHERE me.room_id = r.id AND me.user_id = $1
            )
            GROUP BY r.id
            ORDER BY r.updated_at DESC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut summaries = Vec::with_capacity(records.len());
        for record in records {
            let room = ChatRoom::try_from(record)?;
            let last_message = fetch_messages(&self.pool, room.id, 0, 1).await?.into_iter().next();
            let message_count = count_room_messages(&self.pool, room.id).await?;
            summaries.push(RoomSummary {
                room,
                last_message,
                message_count,
            });
        }
        Ok(summaries)
    }
}

#[async_trait]
impl RoomMembership for PgChatRoomRepository {
    async fn is_participant(&self, room_id: RoomId, user_id: UserId) -> RepositoryResult<bool> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM chat_room_participants WHERE room_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn participants(&self, room_id: RoomId) -> RepositoryResult<Vec<UserId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM chat_room_participants WHERE room_id = $1 ORDER BY joined_at, user_id",
        )
        .bind(Uuid::from(room_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(UserId::from).collect())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageRepository {
    async fn create_message(&self, message: Message) -> RepositoryResult<MessageWithSender> {
        // 参与者校验与写入放在同一条语句里
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            WITH inserted AS (
                INSERT INTO messages (id, room_id, sender_id, content, message_type, created_at)
                SELECT $1, $2, $3, $4, $5, $6
                WHERE EXISTS (
                    SELECT 1 FROM chat_room_participants WHERE room_id = $2 AND user_id = $3
                )
                RETURNING id, room_id, sender_id, content, message_type, created_at
            )
            SELECT i.id, i.room_id, i.sender_id, i.content, i.message_type, i.created_at,
                   COALESCE(u.email, '') AS sender_email,
                   COALESCE(u.first_name, '') AS sender_first_name,
                   COALESCE(u.last_name, '') AS sender_last_name
            FROM inserted i
            LEFT JOIN users u ON u.id = i.sender_id
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.room_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match record {
            Some(record) => MessageWithSender::try_from(record),
            None => Err(RepositoryError::conflict(
                "sender is not a participant of the room",
            )),
        }
    }

    async fn touch_room(&self, room_id: RoomId, at: Timestamp) -> RepositoryResult<()> {
        let result =
            sqlx::query("UPDATE chat_rooms SET updated_at = GREATEST(updated_at, $2) WHERE id = $1")
                .bind(Uuid::from(room_id))
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_message(&self, message_id: MessageId) -> RepositoryResult<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT m.id, m.room_id, m.sender_id, m.content, m.message_type, m.created_at,
                   COALESCE(u.email, '') AS sender_email,
                   COALESCE(u.first_name, '') AS sender_first_name,
                   COALESCE(u.last_name, '') AS sender_last_name
            FROM messages m
            LEFT JOIN users u ON u.id = m.sender_id
            WHERE m.id = $1
            "#,
        )
        .bind(Uuid::from(message_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record
            .map(|record| MessageWithSender::try_from(record).map(|full| full.message))
            .transpose()
    }

    async fn find_room_for_message(
        &self,
        message_id: MessageId,
    ) -> RepositoryResult<Option<RoomId>> {
        let room_id: Option<Uuid> = sqlx::query_scalar("SELECT room_id FROM messages WHERE id = $1")
            .bind(Uuid::from(message_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok(room_id.map(RoomId::from))
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        offset: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<MessageWithSender>> {
        fetch_messages(&self.pool, room_id, offset, limit).await
    }

    async fn count_messages(&self, room_id: RoomId) -> RepositoryResult<u64> {
        count_room_messages(&self.pool, room_id).await
    }

    async fn delete_message(&self, message_id: MessageId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(Uuid::from(message_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn unread_count(&self, user_id: UserId) -> RepositoryResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN chat_room_participants p ON p.room_id = m.room_id AND p.user_id = $1
            WHERE m.sender_id <> $1
              AND NOT EXISTS (
                  SELECT 1 FROM message_read_receipts r
                  WHERE r.message_id = m.id AND r.user_id = $1
              )
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count.max(0) as u64)
    }
}

#[derive(Clone)]
pub struct PgReadReceiptRepository {
    pool: PgPool,
}

impl PgReadReceiptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadReceiptStore for PgReadReceiptRepository {
    async fn upsert_read_receipt(&self, receipt: ReadReceipt) -> RepositoryResult<ReadReceipt> {
        let record = sqlx::query_as::<_, ReceiptRecord>(
            r#"
            INSERT INTO message_read_receipts (message_id, user_id, read_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (message_id, user_id) DO UPDATE SET read_at = EXCLUDED.read_at
            RETURNING message_id, user_id, read_at
            "#,
        )
        .bind(Uuid::from(receipt.message_id))
        .bind(Uuid::from(receipt.user_id))
        .bind(receipt.read_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.into())
    }

    async fn find_read_receipt(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> RepositoryResult<Option<ReadReceipt>> {
        let record = sqlx::query_as::<_, ReceiptRecord>(
            r#"
            SELECT message_id, user_id, read_at
            FROM message_read_receipts
            WHERE message_id = $1 AND user_id = $2
            "#,
        )
        .bind(Uuid::from(message_id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(record.map(Into::into))
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
