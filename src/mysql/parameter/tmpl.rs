//! Option-file and bootstrap-SQL template blocks. The mysqld section is a
//! list of blocks assembled per mode; the replication blocks exist once, in
//! their active form, and are commented out as a whole when the mode does
//! not enable them.

pub const COMMON: &str = r#"[client]
socket={{ data_dir_base }}/mysql.sock
user={{ client_user }}
password={{ client_pass }}

[mysql]
prompt=[\\u@\\h:\\p][\\d]>
default-character-set=utf8mb4

[mysqld_multi]
log={{ data_dir_base_name }}/mysqld_multi/mysqld_multi.log
user={{ mysqld_multi_user }}
pass={{ mysqld_multi_pass }}
"#;

pub const MYSQLD80_BASE: &str = r#"
[{{ title }}]
port={{ port_num }}
mysqlx_port={{ port_num }}0
admin_port={{ port_num }}2
basedir={{ binary_dir_base }}
datadir={{ data_dir_base }}/data
tmpdir={{ data_dir_base }}/tmp
socket={{ data_dir_base }}/run/mysql.sock
mysqlx_socket={{ data_dir_base }}/run/mysqlx.sock
pid-file={{ data_dir_base }}/run/mysql.pid
log-error={{ data_dir_base }}/log/mysql.err
#mysqld={{ binary_dir_base }}/bin/mysqld_safe
#mysqladmin={{ binary_dir_base }}/bin/mysqladmin
default-time-zone='+08:00'
character-set-server=utf8mb4
thread_cache_size=512
sql_mode=STRICT_TRANS_TABLES,NO_ENGINE_SUBSTITUTION,PIPES_AS_CONCAT,ONLY_FULL_GROUP_BY,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO
#tls_version=''
"#;

pub const MYSQLD80_SEMI_SYNC: &str = r#"plugin_load="rpl_semi_sync_source=semisync_source.so;rpl_semi_sync_replica=semisync_replica.so"
rpl_semi_sync_source_wait_point=after_sync
rpl_semi_sync_source_enabled={{ semi_sync_source_enabled }}
rpl_semi_sync_replica_enabled={{ semi_sync_replica_enabled }}
rpl_semi_sync_source_timeout={{ semi_sync_source_timeout }}
rpl_semi_sync_source_wait_for_replica_count=1
rpl_semi_sync_source_wait_no_replica=1
"#;

pub const MYSQLD80_GROUP_REPLICATION: &str = r#"group_replication_single_primary_mode=on
group_replication_consistency={{ group_replication_consistency }}
group_replication_flow_control_mode={{ group_replication_flow_control_mode }}
group_replication_member_weight={{ group_replication_member_weight }}
"#;

pub const MYSQLD80_TAIL: &str = r#"
server-id={{ server_id }}
gtid_mode=on
enforce_gtid_consistency=1
binlog_gtid_simple_recovery=1
sync_binlog=1
log-bin={{ log_dir_base }}/binlog/mysql-bin
binlog_format=row
binlog_row_image=full
max_binlog_size=1G
binlog_cache_size=4M
binlog_error_action=ABORT_SERVER
binlog_expire_logs_seconds={{ binlog_expire_logs_seconds }}
log_replica_updates=1
relay_log={{ log_dir_base }}/relaylog/mysql-relay
max_relay_log_size=1G
relay_log_purge=1
relay_log_recovery=1
report_host={{ host_ip }}
report_port={{ port_num }}
replica_parallel_workers=16
replica_preserve_commit_order=1
replica_transaction_retries=128
binlog_transaction_dependency_tracking=writeset
binlog_transaction_dependency_history_size=25000

secure_file_priv={{ backup_dir }}
max_connections={{ max_connections }}
transaction-isolation=READ-COMMITTED
table_open_cache=2048
lower_case_table_names=1
max_allowed_packet=64M
tmp_table_size=64M
max_heap_table_size=64M
sort_buffer_size=4M
join_buffer_size=4M
read_buffer_size=8M
read_rnd_buffer_size=4M
key_buffer_size=32M
bulk_insert_buffer_size=64M
innodb_flush_log_at_trx_commit=1
innodb_log_file_size=1G
innodb_log_files_in_group=4
innodb_log_group_home_dir={{ log_dir_base }}/data
innodb_data_file_path=ibdata1:1024M:autoextend
innodb_autoextend_increment=16
innodb_buffer_pool_instances=8
innodb_buffer_pool_size={{ innodb_buffer_pool_size }}
innodb_sort_buffer_size=4M
innodb_log_buffer_size=32M
innodb_read_io_threads=16
innodb_write_io_threads=16
innodb_io_capacity={{ innodb_io_capacity }}
innodb_io_capacity_max={{ innodb_io_capacity_max }}
innodb_page_cleaners=16
innodb_flush_method=O_DIRECT
innodb_monitor_enable=ALL
innodb_print_all_deadlocks=1
innodb_numa_interleave=1

general_log=OFF
general_log_file={{ data_dir_base }}/log/general.log
slow_query_log=ON
slow_query_log_file={{ data_dir_base }}/log/mysql-slow.log
long_query_time=0.1
log_output=file
performance_schema=ON
"#;

pub const INIT_USER_SQL: &str = r#"alter user root@'localhost' identified by '{{ root_pass }}' ;
create user root@'%' identified by '{{ root_pass }}' ;
grant all on *.* to root@'%' with grant option ;
create user {{ admin_user }}@'%' identified by '{{ admin_pass }}' ;
grant all on *.* to {{ admin_user }}@'%' with grant option ;
create user {{ mysqld_multi_user }}@'localhost' identified by '{{ mysqld_multi_pass }}' ;
grant shutdown on *.* to {{ mysqld_multi_user }}@'localhost' ;
create user {{ replication_user }}@'%' identified by '{{ replication_pass }}' ;
grant replication client, replication slave on *.* to {{ replication_user }}@'%' ;
create user {{ monitor_user }}@'localhost' identified by '{{ monitor_pass }}' ;
grant select, reload, process, super, replication client on *.* to {{ monitor_user }}@'localhost' ;
create user {{ monitor_user }}@'127.0.0.1' identified by '{{ monitor_pass }}' ;
grant select, reload, process, super, replication client on *.* to {{ monitor_user }}@'127.0.0.1' ;
create user {{ das_user }}@'%' identified by '{{ das_pass }}' ;
grant select, reload, process, super, replication client, replication slave on *.* to {{ das_user }}@'%' ;
"#;

/// Comments out every non-empty line of a block.
pub fn comment_out(block: &str) -> String {
    block
        .lines()
        .map(|line| {
            if line.is_empty() {
                line.to_string()
            } else {
                format!("#{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_out_prefixes_each_line() {
        let commented = comment_out("a=1\n\nb=2\n");
        assert_eq!(commented, "#a=1\n\n#b=2\n");
    }
}
