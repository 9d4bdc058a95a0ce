//! 内置意图标签与哨兵任务名
//!
//! 意图标签形如 `Subject@name`，主语为 `User` 的由 NLU 给出，主语为 `Bot` 的由图状态推导。

pub const DEFAULT_TAG: &str = "default";

/// 哨兵任务
pub const BEGIN_TASK: &str = "BEGIN";
pub const DONE_TASK: &str = "DONE";

pub const USER_SUBJECT: &str = "User";
pub const BOT_SUBJECT: &str = "Bot";

pub const USER_PROVIDE_DATA: &str = "User@provide_data";
pub const USER_HAS_MESSAGE: &str = "User@has_message";
pub const USER_MENTION_OBJECT: &str = "User@mention_object";

pub const BOT_USER_MISSING_INFO: &str = "Bot@user_missing_info";
pub const BOT_BILL_MISSING_INFO: &str = "Bot@bill_missing_info";
pub const BOT_USER_HAS_ATTRIBUTE: &str = "Bot@user_has_attribute";
pub const BOT_USER_MULTI_VALUE: &str = "Bot@user_multi_value";
pub const BOT_USER_HAS_ONE: &str = "Bot@user_has_one";

pub const BOT_BILL_CONFIRMED: &str = "Bot@bill_confirmed";
pub const BOT_BILL_PROCESSING: &str = "Bot@bill_processing";
pub const BOT_NONE_CONFIRMED_BILL: &str = "Bot@none_confirmed_bill";
pub const BOT_SINGLE_CONFIRMED_BILL: &str = "Bot@single_confirmed_bill";
pub const BOT_MULTIPLE_CONFIRMED_BILLS: &str = "Bot@multiple_confirmed_bills";
pub const BOT_NONE_OLD_BILL: &str = "Bot@none_old_bill";
pub const BOT_MULTIPLE_OLD_BILLS: &str = "Bot@multiple_old_bills";

pub const BOT_MULTI_OBJECTS: &str = "Bot@multi_objects";
pub const BOT_OBJECT_NOT_FOUND: &str = "Bot@object_not_found";
pub const BOT_SINGLE_OBJECT: &str = "Bot@single_object";

pub const BOT_USER_MENTIONED_TIME: &str = "Bot@user_mentioned_time";
pub const BOT_USER_MENTIONED_MONEY: &str = "Bot@user_mentioned_money";
pub const BOT_USER_WRONG_PHONE: &str = "Bot@user_wrong_phone";

/// 内置 hook
pub const BOT_UPDATE_USER_ATTRIBUTE_STATUS: &str = "Bot@update_user_attribute_status";
pub const BOT_CONFIRM_BILL: &str = "Bot@confirm_bill";
pub const BOT_PROCESS_BILL: &str = "Bot@process_bill";
pub const BOT_CANCEL_BILL: &str = "Bot@cancel_bill";
pub const BOT_UPDATE_BILL_ADDRESS: &str = "Bot@update_bill_address";
pub const BOT_UPDATE_BILL_PHONE_NUMBER: &str = "Bot@update_bill_phone_number";

/// `{base}_{attr}`，如 `Bot@user_missing_info_address`
pub fn with_attr(base: &str, attr: &str) -> String {
    format!("{base}_{attr}")
}

/// 标签的主语（`@` 之前的部分）；没有 `@` 时整个标签视为主语
pub fn subject_of(tag: &str) -> &str {
    tag.split_once('@').map_or(tag, |(subject, _)| subject)
}

pub fn is_bot_tag(tag: &str) -> bool {
    subject_of(tag) == BOT_SUBJECT
}

pub fn is_user_tag(tag: &str) -> bool {
    subject_of(tag) == USER_SUBJECT
}
