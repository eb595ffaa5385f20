mod brand;
mod collection;
mod helpers;
mod import;
mod perfume;
mod quiz;
mod review;
mod user;

pub(crate) use brand::{cmd_brand_add, cmd_brand_list, cmd_brand_show};
pub(crate) use collection::{cmd_collection_clear, cmd_collection_list, cmd_collection_set};
pub(crate) use import::cmd_import_catalog;
pub(crate) use perfume::{
    PerfumeArgs, cmd_perfume_add, cmd_perfume_add_note, cmd_perfume_delete, cmd_perfume_list,
    cmd_perfume_show,
};
pub(crate) use quiz::cmd_quiz;
pub(crate) use review::{cmd_review_add, cmd_review_delete, cmd_review_list};
pub(crate) use user::{cmd_user_add, cmd_user_list, cmd_user_promote};
