use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::mysql::MySqlPool;
use sqlx::{FromRow, QueryBuilder};

/// Operation kinds recorded in `t_mysql_operation_info`. Only `Install` is
/// driven by this service today; the other values are reserved wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationType {
    Install = 1,
    Upgrade = 2,
    RemoveInstance = 3,
    RemoveBinary = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Running = 1,
    Success = 2,
    Failed = 3,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationInfo {
    pub id: u64,
    pub operation_type: i32,
    pub addrs: String,
    pub status: i32,
    pub message: String,
    pub del_flag: i32,
    pub create_time: NaiveDateTime,
    pub last_update_time: NaiveDateTime,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OperationDetail {
    pub id: u64,
    pub operation_id: u64,
    pub host_ip: String,
    pub port_num: i32,
    pub status: i32,
    pub message: String,
    pub del_flag: i32,
    pub create_time: NaiveDateTime,
    pub last_update_time: NaiveDateTime,
}

/// Audit and lock surface of the relational store. The engine and service
/// only ever talk to this trait; the sqlx-backed implementation below is the
/// production one.
#[async_trait]
pub trait OperationStore: Send + Sync {
    async fn begin_operation(&self, operation_type: OperationType, addrs: &str) -> Result<u64, sqlx::Error>;

    async fn finish_operation(&self, id: u64, status: Status, message: &str) -> Result<(), sqlx::Error>;

    async fn begin_detail(&self, operation_id: u64, host_ip: &str, port_num: u16) -> Result<u64, sqlx::Error>;

    async fn finish_detail(&self, detail_id: u64, status: Status, message: &str) -> Result<(), sqlx::Error>;

    /// Locks every address in one multi-row INSERT. The unique index on
    /// `addr` fails the whole statement if any address is already locked, so
    /// either all rows land or none do.
    async fn acquire_lock(&self, operation_id: u64, addrs: &[String]) -> Result<(), sqlx::Error>;

    async fn release_lock(&self, operation_id: u64) -> Result<(), sqlx::Error>;

    async fn get_operation(&self, id: u64) -> Result<Option<OperationInfo>, sqlx::Error>;

    async fn get_details(&self, operation_id: u64) -> Result<Vec<OperationDetail>, sqlx::Error>;
}

pub struct MySqlRepository {
    pool: MySqlPool,
}

impl MySqlRepository {
    pub fn new(pool: MySqlPool) -> MySqlRepository {
        MySqlRepository { pool }
    }
}

#[async_trait]
impl OperationStore for MySqlRepository {
    async fn begin_operation(&self, operation_type: OperationType, addrs: &str) -> Result<u64, sqlx::Error> {
        let sql = "INSERT INTO t_mysql_operation_info(operation_type, addrs, status) VALUES(?, ?, ?)";
        debug!("begin operation. addrs: {addrs}");

        let result = sqlx::query(sql)
            .bind(operation_type as i32)
            .bind(addrs)
            .bind(Status::Running as i32)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_id())
    }

    async fn finish_operation(&self, id: u64, status: Status, message: &str) -> Result<(), sqlx::Error> {
        let sql = "UPDATE t_mysql_operation_info SET status = ?, message = ? WHERE id = ?";
        debug!("finish operation. id: {id}, status: {status:?}");

        sqlx::query(sql)
            .bind(status as i32)
            .bind(message)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn begin_detail(&self, operation_id: u64, host_ip: &str, port_num: u16) -> Result<u64, sqlx::Error> {
        let sql = "INSERT INTO t_mysql_operation_detail(operation_id, host_ip, port_num, status) VALUES(?, ?, ?, ?)";
        debug!("begin detail. operation_id: {operation_id}, host: {host_ip}, port: {port_num}");

        let result = sqlx::query(sql)
            .bind(operation_id)
            .bind(host_ip)
            .bind(port_num)
            .bind(Status::Running as i32)
            .execute(&self.pool)
            .await?;

        Ok(result.last_insert_id())
    }

    async fn finish_detail(&self, detail_id: u64, status: Status, message: &str) -> Result<(), sqlx::Error> {
        let sql = "UPDATE t_mysql_operation_detail SET status = ?, message = ? WHERE id = ?";
        debug!("finish detail. id: {detail_id}, status: {status:?}");

        sqlx::query(sql)
            .bind(status as i32)
            .bind(message)
            .bind(detail_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn acquire_lock(&self, operation_id: u64, addrs: &[String]) -> Result<(), sqlx::Error> {
        if addrs.is_empty() {
            return Ok(());
        }
        debug!("acquire lock. operation_id: {operation_id}, addrs: {addrs:?}");

        build_acquire_lock(operation_id, addrs).build().execute(&self.pool).await?;

        Ok(())
    }

    async fn release_lock(&self, operation_id: u64) -> Result<(), sqlx::Error> {
        let sql = "DELETE FROM t_mysql_operation_lock WHERE operation_id = ?";
        debug!("release lock. operation_id: {operation_id}");

        sqlx::query(sql).bind(operation_id).execute(&self.pool).await?;

        Ok(())
    }

    async fn get_operation(&self, id: u64) -> Result<Option<OperationInfo>, sqlx::Error> {
        let sql = "
            SELECT id,
                   operation_type,
                   addrs,
                   status,
                   message,
                   del_flag,
                   create_time,
                   last_update_time
            FROM t_mysql_operation_info
            WHERE del_flag = 0
              AND id = ?
        ";

        sqlx::query_as::<_, OperationInfo>(sql).bind(id).fetch_optional(&self.pool).await
    }

    async fn get_details(&self, operation_id: u64) -> Result<Vec<OperationDetail>, sqlx::Error> {
        let sql = "
            SELECT id,
                   operation_id,
                   host_ip,
                   port_num,
                   status,
                   message,
                   del_flag,
                   create_time,
                   last_update_time
            FROM t_mysql_operation_detail
            WHERE del_flag = 0
              AND operation_id = ?
            ORDER BY id ASC
        ";

        sqlx::query_as::<_, OperationDetail>(sql).bind(operation_id).fetch_all(&self.pool).await
    }
}

fn build_acquire_lock(operation_id: u64, addrs: &[String]) -> QueryBuilder<'static, sqlx::MySql> {
    let mut builder: QueryBuilder<sqlx::MySql> =
        QueryBuilder::new("INSERT INTO t_mysql_operation_lock(operation_id, addr) ");
    builder.push_values(addrs.iter().cloned(), |mut row, addr| {
        row.push_bind(operation_id);
        row.push_bind(addr);
    });

    builder
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_lock_sql_is_one_multi_value_insert() {
        let addrs = vec!["192.168.137.21:3306".to_string(), "192.168.137.21:3307".to_string()];
        let mut builder = build_acquire_lock(7, &addrs);

        assert_eq!(
            builder.sql(),
            "INSERT INTO t_mysql_operation_lock(operation_id, addr) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(Status::Running as i32, 1);
        assert_eq!(Status::Success as i32, 2);
        assert_eq!(Status::Failed as i32, 3);
        assert_eq!(OperationType::Install as i32, 1);
        assert_eq!(OperationType::RemoveBinary as i32, 4);
    }
}
