use crate::obj::options::DbPath;

fn make_file_name(db_name: &str, number: u64, suffix: &str) -> String {
    format!("{db_name}/{number:06}.{suffix}")
}

/// `{db_name}/{number:06}.sst`
pub fn table_file_name(db_name: &str, number: u64) -> String {
    debug_assert!(number > 0);
    make_file_name(db_name, number, "sst")
}

/// 旧版本使用的后缀
pub fn legacy_table_file_name(db_name: &str, number: u64) -> String {
    debug_assert!(number > 0);
    make_file_name(db_name, number, "ldb")
}

/// 表文件所在的目录：path_id 是 db_paths 中的下标，db_paths 为空时使用 db_name
pub fn table_file_dir<'a>(db_name: &'a str, db_paths: &'a [DbPath], path_id: u32) -> &'a str {
    if db_paths.is_empty() {
        return db_name;
    }
    match db_paths.get(path_id as usize) {
        Some(db_path) => &db_path.path,
        // 越界时退回最后一个目录
        None => &db_paths[db_paths.len() - 1].path,
    }
}
